//! The retry-on-reopen wrapper (spec §4.2, §9 "Retry-on-reopen wrapper").
//!
//! Every call into a [`SingleDatabase`] from the writer or the search
//! executor goes through [`EngineFacade::retry`] rather than touching the
//! database directly, so the policy lives in exactly one place:
//!
//! ```ignore
//! for t in 0..4 {
//!     match op() { Ok(v) => return Ok(v), Err(e) if transient(e) => { sleep_if(t>0); reopen_if(t>0); } Err(e) => return Err(e) }
//! }
//! // 4 attempts exhausted -> single wrapper error
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::database::SingleDatabase;
use crate::error::EngineError;

/// Attempts bounded to 4, matching spec §4.2 exactly.
const MAX_ATTEMPTS: u32 = 4;
/// Sleep applied before the *second* retry (i.e. attempt index 1, 0-based).
const RETRY_SLEEP: Duration = Duration::from_millis(100);

pub struct EngineFacade {
    db: Arc<SingleDatabase>,
}

impl EngineFacade {
    pub fn new(db: Arc<SingleDatabase>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<SingleDatabase> {
        &self.db
    }

    /// Runs `op` against the wrapped database, reopening and retrying on
    /// `EngineError::Transient`. `DocNotFoundError`/`InvalidArgumentError`
    /// (mapped to `NotFound`/`InvalidArgument`) are never retried (spec
    /// §4.2).
    pub fn retry<T>(&self, mut op: impl FnMut(&SingleDatabase) -> Result<T, EngineError>) -> Result<T, EngineError> {
        let mut attempt = 0u32;
        loop {
            match op(&self.db) {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        return Err(EngineError::Transient(format!(
                            "{} (after {} attempts)",
                            e, attempt
                        )));
                    }

                    if self.db.closed() {
                        // spec §4.2: "force a full open using the stored
                        // endpoint list". A tantivy `Index` handle can't be
                        // rebuilt from inside itself once closed, so the
                        // pool is responsible for evicting and reopening a
                        // fresh handle (see `pool::DbPool::release`); the
                        // façade surfaces this as a final transient error
                        // so the caller knows to reacquire.
                        return Err(EngineError::Transient(
                            "database handle closed, reacquire from pool".to_string(),
                        ));
                    }

                    if attempt == 2 {
                        std::thread::sleep(RETRY_SLEEP);
                    }

                    if let Err(reopen_err) = self.db.reopen() {
                        log::debug!("reopen during retry failed: {}", reopen_err);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn retry_bound_is_four_attempts() {
        // Exercises the counting logic in isolation (without a real
        // database) by asserting the constant matches the documented
        // contract; full integration coverage lives in `writer`'s tests.
        assert_eq!(MAX_ATTEMPTS, 4);
    }

    #[test]
    fn non_transient_errors_are_never_retried() {
        let calls = Cell::new(0);
        let result: Result<(), EngineError> = (|| {
            let mut attempt = 0u32;
            loop {
                calls.set(calls.get() + 1);
                let r: Result<(), EngineError> = if attempt == 0 {
                    Err(EngineError::NotFound)
                } else {
                    Ok(())
                };
                match r {
                    Ok(v) => return Ok(v),
                    Err(e) if e.is_transient() => {
                        attempt += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }
        })();
        assert!(matches!(result, Err(EngineError::NotFound)));
        assert_eq!(calls.get(), 1);
    }
}
