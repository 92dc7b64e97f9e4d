//! Wire-level types shared between the fork pool, the coordinator and the simulation engine.

mod block;
mod burst;
mod messages;
mod receipt;
pub mod serde_helpers;
mod transaction;

pub use self::{
    block::BlockHeader,
    burst::{Burst, WorkGroup},
    messages::{BurstEntry, CoreMessage, JobMessage, WorkRequest},
    receipt::ForkReceipt,
    transaction::CandidateTransaction,
};
