//! Verdict-gated build loop for an autonomous coding agent.
//!
//! The loop invokes an execution agent once per iteration and stops only when an
//! independent reviewer has approved the work *and* the agent has claimed
//! completion in the same iteration. Consecutive denials escalate the
//! instructions until the reviewer approves again.
//!
//! - **[`core`]**: Pure decision logic (verdict classification, denial streak,
//!   escalation text). No I/O.
//! - **[`io`]**: Side-effecting adapters (verdict artifact, progress ledger,
//!   agent subprocess, config, scaffolding).
//!
//! [`controller`] ties both together into the iteration state machine.

pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
