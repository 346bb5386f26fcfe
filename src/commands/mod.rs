//! Command implementations for pgshift.
//!
//! All four subcommands share one workflow; the mode decides which steps run.

mod upgrade;

pub use upgrade::{upgrade, RunOutcome};
