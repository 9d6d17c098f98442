//! Shared contracts for the morava leader-election stack.
//!
//! This crate holds the pieces every lock backend and the election engine
//! agree on: the [`lease::LeaseRecord`] stored under a lock, the
//! [`lock::LeaderLock`] trait backends implement, and the error kinds the
//! engine dispatches on.

pub mod lease;
pub mod lock;

pub use lease::{epoch_millis, LeaseRecord};
pub use lock::{LeaderLock, LockError, MemoryLock};
