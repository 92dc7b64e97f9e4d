//! Tagged envelopes exchanged between a worker and its supervising coordinator.

use crate::{Burst, CandidateTransaction};
use serde::{Deserialize, Serialize};

/// Worker -> coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobMessage {
    PortRequest,
    WorkRequest(WorkRequest),
}

/// Coordinator -> worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CoreMessage {
    AvailablePort { port: u16 },
}

/// A workable burst forwarded upstream for real submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkRequest {
    pub job: String,
    pub correlation_id: String,
    pub burst: Vec<BurstEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurstEntry {
    pub target_block: u64,
    pub unsigned_txs: Vec<CandidateTransaction>,
    pub log_id: String,
}

impl WorkRequest {
    pub fn from_burst(job: impl Into<String>, burst: &Burst) -> Self {
        Self {
            job: job.into(),
            correlation_id: burst.correlation_id.clone(),
            burst: burst
                .work_groups
                .iter()
                .map(|group| BurstEntry {
                    target_block: group.target_block,
                    unsigned_txs: group.txs.clone(),
                    log_id: group.log_id.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CoreMessage, JobMessage, WorkRequest};
    use crate::{Burst, CandidateTransaction, WorkGroup};
    use alloy::primitives::Address;
    use serde_json::json;

    #[test]
    fn port_request_envelope() {
        assert_eq!(
            serde_json::to_value(JobMessage::PortRequest).unwrap(),
            json!({ "type": "PortRequest" })
        );
    }

    #[test]
    fn available_port_envelope() {
        let message: CoreMessage =
            serde_json::from_value(json!({ "type": "AvailablePort", "port": 8545 })).unwrap();
        assert_eq!(message, CoreMessage::AvailablePort { port: 8545 });
    }

    #[test]
    fn unknown_envelope_is_rejected() {
        let result = serde_json::from_value::<CoreMessage>(json!({ "type": "Shutdown" }));
        assert!(result.is_err());
    }

    #[test]
    fn work_request_is_keyed_by_correlation_id() {
        let burst = Burst::new(
            "burst-1",
            vec![WorkGroup {
                target_block: 101,
                txs: vec![CandidateTransaction::new(Address::ZERO)],
                log_id: "log-a".to_string(),
            }],
        );
        let message = JobMessage::WorkRequest(WorkRequest::from_burst("harvest", &burst));
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["type"], "WorkRequest");
        assert_eq!(value["job"], "harvest");
        assert_eq!(value["correlationId"], "burst-1");
        assert_eq!(value["burst"][0]["targetBlock"], 101);
        assert_eq!(value["burst"][0]["logId"], "log-a");
        assert_eq!(
            value["burst"][0]["unsignedTxs"][0]["from"],
            "0x0000000000000000000000000000000000000000"
        );
    }
}
