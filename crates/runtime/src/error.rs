//! Error taxonomy for the world loop. Most failures propagate as a plain
//! `anyhow::Error` at crate boundaries; the categories the tick loop's own
//! recovery logic needs to match on get their own variants here.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("persona {0} not found in this simulation")]
    UnknownPersona(String),
    #[error("simulation directory {0} has no meta.json")]
    MissingMeta(PathBuf),
    #[error("frontend did not publish environment/{0}.json before the poll budget was exhausted")]
    FrontendDesync(u64),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}
