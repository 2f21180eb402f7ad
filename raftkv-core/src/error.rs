//! Error tiers shared by every crate in the workspace.
//!
//! Tier 1 (`Protocol`) and tier 2 (`Operation`) are ordinary values that
//! the event loop logs or returns to a client. Tier 3 (`Fatal`) is meant
//! to propagate all the way to `main` and terminate the process.

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed envelope, unknown reply correlation id, unknown message
    /// type: logged and discarded, never crashes the loop.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A well-formed client operation that cannot be satisfied (key not
    /// found, CAS mismatch, not a leader). Returned to the client as a
    /// structured `error` body.
    #[error("operation error: {0}")]
    Operation(KvError),

    /// Violation of a core invariant (term regression, double init,
    /// out-of-order apply, duplicate handler registration). Crashes the
    /// node with a diagnostic.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serde(String),

    /// End of input on the transport. Not an error tier in the sense of
    /// §7 -- it is how the event loop learns to shut down cleanly (§6:
    /// "clean exit on end-of-input or interrupt").
    #[error("end of input")]
    Eof,
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serde(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The wire-level shape of a client-facing operation error.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[error("{text} (code {code})")]
pub struct KvError {
    pub code: u32,
    pub text: String,
}

impl KvError {
    pub const NOT_FOUND: u32 = 20;
    pub const CAS_MISMATCH: u32 = 22;
    pub const NOT_LEADER: u32 = 11;

    pub fn not_found() -> Self {
        KvError {
            code: Self::NOT_FOUND,
            text: "not found".to_string(),
        }
    }

    pub fn cas_mismatch(from: &serde_json::Value, current: &serde_json::Value) -> Self {
        KvError {
            code: Self::CAS_MISMATCH,
            text: format!("expected {} but had {}", from, current),
        }
    }

    pub fn not_leader() -> Self {
        KvError {
            code: Self::NOT_LEADER,
            text: "not a leader".to_string(),
        }
    }
}
