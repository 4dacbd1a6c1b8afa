//! Maps text commands onto the engine (spec §6.1 command table).
//!
//! Every handler here receives a [`Ctx`] bundling the pieces it needs —
//! shared server state, this connection's session, the write half, the
//! command's `cmd_id`, and its [`AliveToken`] — and writes its own
//! reply lines directly, since a threaded command may need to stream
//! many rows before its terminal status line.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use xapiand_engine::{
    parse, parse_all, AliveToken, Endpoint, InputDocument, ParsedQuery, WriteEnvelope, WriteOp,
};

use crate::help;
use crate::protocol::{self, Writer};
use crate::session::Session;
use crate::state::AppState;

pub struct Ctx {
    pub state: Arc<AppState>,
    pub session: Arc<RwLock<Session>>,
    pub writer: Writer,
    pub cmd_id: u64,
    pub token: AliveToken,
}

impl Ctx {
    pub async fn send(&self, body: impl AsRef<str>) {
        protocol::send_line(&self.writer, self.cmd_id, body.as_ref()).await;
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SearchMode {
    Search,
    Find,
    Terms,
    Facets,
    Count,
}

/// Dispatches one already-split `(cmd, payload)` pair. Returns `true` if
/// the connection should close after this command (`QUIT`/`EXIT`).
pub async fn dispatch(ctx: &Ctx, cmd: &str, payload: &str) -> bool {
    match cmd.to_ascii_uppercase().as_str() {
        "VERSION" => cmd_version(ctx).await,
        "OPEN" => cmd_open(ctx, payload).await,
        "USING" => cmd_using(ctx, payload).await,
        "CREATE" => cmd_create(ctx, payload).await,
        "REOPEN" => cmd_reopen(ctx).await,
        "INDEX" => cmd_index(ctx, payload, false).await,
        "CINDEX" => cmd_index(ctx, payload, true).await,
        "DELETE" => cmd_delete(ctx, payload, false).await,
        "CDELETE" => cmd_delete(ctx, payload, true).await,
        "COMMIT" => cmd_commit(ctx).await,
        "SEARCH" => cmd_query(ctx, payload, SearchMode::Search).await,
        "FIND" => cmd_query(ctx, payload, SearchMode::Find).await,
        "TERMS" => cmd_query(ctx, payload, SearchMode::Terms).await,
        "FACETS" => cmd_query(ctx, payload, SearchMode::Facets).await,
        "COUNT" => cmd_query(ctx, payload, SearchMode::Count).await,
        "ENDPOINTS" => cmd_endpoints(ctx).await,
        "HELP" => cmd_help(ctx, payload).await,
        "QUIT" | "EXIT" => {
            ctx.send(protocol::BYE).await;
            return true;
        }
        other => {
            ctx.send(protocol::err(404, &format!("Unknown command: {}", other)))
                .await;
        }
    }
    false
}

async fn cmd_version(ctx: &Ctx) {
    ctx.send(protocol::ok(Some(env!("CARGO_PKG_VERSION")))).await;
}

fn parse_endpoints(raw: &str) -> Result<Vec<Endpoint>, String> {
    let tokens: Vec<String> = raw.split_whitespace().map(|s| s.to_string()).collect();
    if tokens.is_empty() {
        return Err("requires at least one endpoint".to_string());
    }
    parse_all(&tokens).map_err(|e| e.to_string())
}

async fn cmd_open(ctx: &Ctx, payload: &str) {
    let endpoints = match parse_endpoints(payload) {
        Ok(e) => e,
        Err(msg) => {
            ctx.send(protocol::err(400, &msg)).await;
            return;
        }
    };

    {
        let mut session = ctx.session.write();
        session.endpoints = endpoints;
        session.writable = false;
    }
    ctx.send(protocol::ok(None)).await;
}

async fn cmd_using(ctx: &Ctx, payload: &str) {
    let endpoints = match parse_endpoints(payload) {
        Ok(e) => e,
        Err(msg) => {
            ctx.send(protocol::err(400, &msg)).await;
            return;
        }
    };

    for ep in &endpoints {
        if let Err(e) = ctx
            .state
            .pool
            .database(std::slice::from_ref(ep), true, false)
            .await
        {
            ctx.send(protocol::err_plain(&e.to_string())).await;
            return;
        }
    }

    {
        let mut session = ctx.session.write();
        session.endpoints = endpoints;
        session.writable = true;
    }
    ctx.send(protocol::ok(None)).await;
}

async fn cmd_create(ctx: &Ctx, payload: &str) {
    let tokens: Vec<&str> = payload.split_whitespace().collect();
    if tokens.len() != 1 {
        ctx.send(protocol::err(400, "CREATE requires exactly one endpoint"))
            .await;
        return;
    }

    let endpoint = match Endpoint::parse(tokens[0]) {
        Ok(e) => e,
        Err(e) => {
            ctx.send(protocol::err(400, &e.to_string())).await;
            return;
        }
    };

    if let Err(e) = ctx.state.pool.database(std::slice::from_ref(&endpoint), true, false).await {
        ctx.send(protocol::err_plain(&e.to_string())).await;
        return;
    }

    {
        let mut session = ctx.session.write();
        session.endpoints = vec![endpoint];
        session.writable = true;
    }
    ctx.send(protocol::ok(None)).await;
}

async fn cmd_reopen(ctx: &Ctx) {
    let endpoints = ctx.session.read().endpoints.clone();
    if endpoints.is_empty() {
        ctx.send(protocol::err_plain("no endpoint selected")).await;
        return;
    }

    // Acquiring with `reopen = true` refreshes the cached reader view
    // before the handle is returned to the pool's `unused` set, so the
    // next acquisition observes the latest commit (spec §6.1 REOPEN).
    match ctx.state.pool.database(&endpoints, false, true).await {
        Ok(_handle) => ctx.send(protocol::ok(None)).await,
        Err(e) => ctx.send(protocol::err_plain(&e.to_string())).await,
    }
}

fn destination_endpoints(session: &Session, doc_endpoints: &[String]) -> Result<Vec<Endpoint>, String> {
    if !doc_endpoints.is_empty() {
        return parse_all(doc_endpoints).map_err(|e| e.to_string());
    }
    if session.endpoints.is_empty() {
        return Err("Select a database with the command OPEN".to_string());
    }
    Ok(session.endpoints.clone())
}

async fn cmd_index(ctx: &Ctx, payload: &str, commit: bool) {
    let doc: InputDocument = match xapiand_engine::parse_index_payload(payload) {
        Ok(d) => d,
        Err(line) => {
            ctx.send(line).await;
            return;
        }
    };

    let destinations = {
        let session = ctx.session.read();
        destination_endpoints(&session, &doc.endpoints)
    };
    let destinations = match destinations {
        Ok(d) => d,
        Err(msg) => {
            ctx.send(protocol::err(405, &msg)).await;
            return;
        }
    };

    for endpoint in destinations {
        let envelope = WriteEnvelope {
            endpoint: endpoint.clone(),
            op: WriteOp::Index { doc: doc.clone(), commit },
        };
        if ctx.state.central_tx.send((endpoint, envelope)).is_err() {
            ctx.send(protocol::err_plain("writer manager is shutting down")).await;
            return;
        }
    }
    ctx.send(protocol::ok(None)).await;
}

async fn cmd_delete(ctx: &Ctx, payload: &str, commit: bool) {
    let id = payload.trim();
    if id.is_empty() {
        ctx.send(protocol::err(400, "DELETE requires an id")).await;
        return;
    }

    let destinations = {
        let session = ctx.session.read();
        if session.endpoints.is_empty() {
            None
        } else {
            Some(session.endpoints.clone())
        }
    };
    let destinations = match destinations {
        Some(d) => d,
        None => {
            ctx.send(protocol::err(405, "Select a database with the command OPEN"))
                .await;
            return;
        }
    };

    for endpoint in destinations {
        let envelope = WriteEnvelope {
            endpoint: endpoint.clone(),
            op: WriteOp::Delete { id: id.to_string(), commit },
        };
        if ctx.state.central_tx.send((endpoint, envelope)).is_err() {
            ctx.send(protocol::err_plain("writer manager is shutting down")).await;
            return;
        }
    }
    ctx.send(protocol::ok(None)).await;
}

async fn cmd_commit(ctx: &Ctx) {
    let destinations = ctx.session.read().endpoints.clone();
    if destinations.is_empty() {
        ctx.send(protocol::err(405, "Select a database with the command OPEN"))
            .await;
        return;
    }

    for endpoint in destinations {
        let envelope = WriteEnvelope { endpoint: endpoint.clone(), op: WriteOp::Commit };
        if ctx.state.central_tx.send((endpoint, envelope)).is_err() {
            ctx.send(protocol::err_plain("writer manager is shutting down")).await;
            return;
        }
    }
    ctx.send(protocol::ok(None)).await;
}

async fn cmd_endpoints(ctx: &Ctx) {
    let endpoints = ctx.session.read().endpoints.clone();
    for ep in &endpoints {
        ctx.send(format!("# {}", ep.canonical())).await;
    }
    ctx.send(protocol::ok(Some(&format!("{} endpoint(s)", endpoints.len()))))
        .await;
}

async fn cmd_help(ctx: &Ctx, payload: &str) {
    let arg = payload.trim();
    if arg.is_empty() {
        for cmd in help::COMMANDS {
            ctx.send(format!("# {} - {}", cmd.usage, cmd.summary)).await;
        }
        ctx.send(protocol::ok(None)).await;
        return;
    }

    match help::find(arg) {
        Some(cmd) => {
            ctx.send(format!("# {} - {}", cmd.usage, cmd.summary)).await;
            ctx.send(protocol::ok(None)).await;
        }
        None => {
            ctx.send(protocol::err(404, &format!("Unknown command: {}", arg)))
                .await;
        }
    }
}

/// Accepts either the DSL (spec §4.6) or a bare JSON object carrying the
/// parser's own output fields (spec §6.1 "Alternatively a single JSON
/// object may be supplied in place of the DSL").
fn parse_query_arg(payload: &str) -> ParsedQuery {
    let trimmed = payload.trim();
    if trimmed.starts_with('{') {
        if let Ok(parsed) = serde_json::from_str::<ParsedQuery>(trimmed) {
            return parsed;
        }
    }
    parse(trimmed)
}

async fn cmd_query(ctx: &Ctx, payload: &str, mode: SearchMode) {
    let endpoints = ctx.session.read().endpoints.clone();
    if endpoints.is_empty() {
        ctx.send(protocol::err(405, "Select a database with the command OPEN"))
            .await;
        return;
    }

    if mode == SearchMode::Count && payload.trim().is_empty() {
        match ctx.state.pool.database(&endpoints, false, false).await {
            Ok(handle) => {
                ctx.send(protocol::ok(Some(&format!("{} documents found", handle.get_doccount()))))
                    .await;
            }
            Err(e) => ctx.send(protocol::err_plain(&e.to_string())).await,
        }
        return;
    }

    let mut parsed = parse_query_arg(payload);
    if matches!(mode, SearchMode::Facets | SearchMode::Count) {
        parsed.maxitems = 0;
    }

    let handle = match ctx.state.pool.database(&endpoints, false, false).await {
        Ok(h) => h,
        Err(e) => {
            ctx.send(protocol::err_plain(&e.to_string())).await;
            return;
        }
    };

    let started = Instant::now();
    let results = match xapiand_engine::execute(&handle, &parsed, &ctx.token) {
        Ok(r) => r,
        Err(e) => {
            if e.downcast_ref::<xapiand_engine::Dead>().is_some() {
                return;
            }
            ctx.send(protocol::err_plain(&e.to_string())).await;
            return;
        }
    };

    if matches!(mode, SearchMode::Search | SearchMode::Find | SearchMode::Terms) {
        ctx.send(format!(
            "# {}",
            protocol::size_header(results.matches.len(), results.size_estimate)
        ))
        .await;
    }

    for facet in &results.facets {
        if ctx.token.check().is_err() {
            return;
        }
        ctx.send(format!(
            "# {}",
            protocol::facet_row(&facet.field, &facet.value, facet.count)
        ))
        .await;
    }

    let (include_data, include_terms) = match mode {
        SearchMode::Search => (true, false),
        SearchMode::Terms => (false, true),
        SearchMode::Find | SearchMode::Facets | SearchMode::Count => (false, false),
    };

    for row in &results.matches {
        if ctx.token.check().is_err() {
            return;
        }
        ctx.send(format!("# {}", protocol::match_row(row, include_data, include_terms)))
            .await;
    }

    let elapsed = xapiand_engine::helpers::format_time(started.elapsed());
    ctx.send(protocol::ok(Some(&format!(
        "{} documents found in {}",
        results.size_estimate, elapsed
    ))))
    .await;
}
