//! fork-pool
//!
//! The `fork_pool_core` crate lets a worker find out whether candidate transactions would
//! succeed before submitting them for real, by replaying them against disposable local forks of
//! a live chain.
//!
//! ## Overview
//!
//! - **Port brokering**: forks are bound to ports granted by a supervising coordinator process,
//!   see [`coordinator`].
//!
//! - **Fork pools**: a batch of forks is started concurrently from one snapshot block and moved
//!   to an identical future timestamp, see [`fork::create_forks`].
//!
//! - **Time control**: blocks and timestamps on a fork are advanced explicitly, see [`time`].
//!
//! - **Replay**: transactions are submitted one at a time, each one waiting for its block and
//!   being classified as included or reverted before the next one goes out, see [`submission`].
//!
//! - **Orchestration**: candidate bursts are paired with forks and workable ones are forwarded
//!   upstream, see [`orchestrator`].
//!
//! - **Helpers**: random ids, stealth hashes and addresses for building bursts, see [`utils`].
//!
//! ## Limitations
//!
//! - Forks are single-use; there is no snapshot/revert between bursts.
//! - Transactions are never signed: senders must be unlocked on the fork.

pub mod coordinator;
pub mod error;
pub mod fork;
pub mod observability;
pub mod orchestrator;
pub mod submission;
pub mod time;
pub mod utils;

mod testing;
