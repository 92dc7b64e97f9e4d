use crate::CandidateTransaction;

/// A group of transactions that should be workable at a given future block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkGroup {
    pub target_block: u64,
    pub txs: Vec<CandidateTransaction>,
    pub log_id: String,
}

/// A correlated set of work groups that are evaluated together on one fork and reported together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Burst {
    pub correlation_id: String,
    pub work_groups: Vec<WorkGroup>,
}

impl Burst {
    pub fn new(correlation_id: impl Into<String>, work_groups: Vec<WorkGroup>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            work_groups,
        }
    }

    /// Total number of transactions across all work groups.
    pub fn tx_count(&self) -> usize {
        self.work_groups.iter().map(|group| group.txs.len()).sum()
    }
}
