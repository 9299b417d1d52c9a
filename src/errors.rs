//! Error variants the top level and tests need to match on by kind.
//! Everything else flows through plain `anyhow::Error` context chains
//! (database failures, plugin load failures, lock failures).

use thiserror::Error;

pub use crate::graph::Cycle;

#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error(transparent)]
    Cycle(#[from] Cycle),

    #[error("Error: Graph is not empty after execution.")]
    GraphNotEmpty,

    #[error("command failed: {command}")]
    CmdFail { command: String },
}
