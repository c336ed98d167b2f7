//! Range-aware read/write locking over keys and records.

mod broker;
mod token;

pub use broker::{LockBroker, Permit};
pub use token::{Predicate, RangeToken, Token};
