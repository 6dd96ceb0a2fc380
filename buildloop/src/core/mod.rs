//! Pure decision logic for the build loop.
//!
//! Core modules must be free of I/O side effects so the state machine's rules
//! can be tested on in-memory values alone.

pub mod decision;
pub mod escalation;
pub mod types;
