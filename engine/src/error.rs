use thiserror::Error;

/// Errors surfaced by the engine façade (§4.2, §7).
///
/// `Transient` is the only variant the retry wrapper in [`crate::facade`]
/// treats as worth reopening and retrying; everything else is returned to
/// the caller immediately.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Maps to Xapian's `NetworkError` / `DatabaseError` — transient,
    /// retry-and-reopen eligible.
    #[error("transient engine error: {0}")]
    Transient(String),

    /// Maps to Xapian's `DocNotFoundError` — never retried, reported to the
    /// caller as "no such document" rather than an error line.
    #[error("no such document")]
    NotFound,

    /// Maps to Xapian's `InvalidArgumentError` — the document is rejected,
    /// logged, and swallowed by the writer (§4.2).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Every other failure from the underlying index (corruption, I/O,
    /// schema mismatch, ...). Not retried.
    #[error("index error: {0}")]
    Index(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether the façade's retry-on-reopen policy (§4.2) applies.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }
}

/// Errors the pool's `database()` acquisition call can raise (§4.3).
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no connections available")]
    Timeout,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Wire-visible protocol errors (§6.1, §7). The dispatcher converts these
/// into `>> ERR: [<code>] <message>` lines; everything else (engine/pool
/// failures) is reported as a bare `>> ERR: <message>` with no code.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("[400] {0}")]
    BadRequest(String),

    #[error("[404] Unknown command: {0}")]
    UnknownCommand(String),

    #[error("[405] {0}")]
    NotAllowed(String),
}

impl ProtocolError {
    pub fn code(&self) -> u16 {
        match self {
            ProtocolError::BadRequest(_) => 400,
            ProtocolError::UnknownCommand(_) => 404,
            ProtocolError::NotAllowed(_) => 405,
        }
    }
}
