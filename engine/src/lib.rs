//! `xapiand-engine`: the pool, writer, query-execution and durable-queue
//! core of the indexing server (spec.md §1 "The core"). The TCP protocol
//! and dispatcher live in the `xapiand` binary crate; this crate is
//! usable on its own (e.g. from a test harness) without pulling in tokio's
//! networking stack or the CLI.

pub mod cancel;
pub mod command;
pub mod commit_policy;
pub mod config;
pub mod database;
pub mod document;
pub mod endpoint;
pub mod error;
pub mod facade;
pub mod helpers;
pub mod pool;
pub mod query;
pub mod queue;
pub mod slot;
pub mod writer;

pub use cancel::{AliveToken, CommandSequence, Dead};
pub use command::{WriteEnvelope, WriteOp};
pub use commit_policy::{CommitDecision, CommitPolicy, Timeouts};
pub use config::{QueueKind, ServerConfig};
pub use database::{CompositeDatabase, EngineDocument, RetrievedDocument, SingleDatabase};
pub use document::{parse_index_payload, InputDocument, StoredValue};
pub use endpoint::{parse_all, Endpoint, Scheme};
pub use error::{EngineError, PoolError, ProtocolError};
pub use facade::EngineFacade;
pub use pool::{DbPool, PoolConfig, ScopedHandle};
pub use query::{execute, parse, FacetRow, MatchRow, ParsedQuery, SearchResults};
pub use queue::{DurableQueue, FileQueue, MemoryQueue};
pub use writer::{WriterContext, WriterManager};
