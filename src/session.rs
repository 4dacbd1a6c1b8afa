//! Per-connection session state (spec §3 "Connection state").

use xapiand_engine::Endpoint;

/// Endpoints selected by OPEN/USING/CREATE, plus whether the selection is
/// writable. Shared between the connection's reader loop (which mutates
/// it on OPEN/USING/CREATE) and any threaded handlers spawned for SEARCH
/// and friends (which only read it), behind a `parking_lot::RwLock`.
#[derive(Debug, Default)]
pub struct Session {
    pub endpoints: Vec<Endpoint>,
    pub writable: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }
}
