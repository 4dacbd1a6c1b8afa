//! Line framing and row encoding for the wire protocol (spec §6.1).
//!
//! Every line sent to a client is prefixed `"<cmd_id>. "` unless it
//! already starts with `#` (a comment/facet/size row) or a space
//! (a continuation), and terminated with `\r\n`.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use xapiand_engine::MatchRow;

pub type Writer = Arc<Mutex<WriteHalf<TcpStream>>>;

fn frame(cmd_id: u64, body: &str) -> String {
    if body.starts_with('#') || body.starts_with(' ') {
        format!("{}\r\n", body)
    } else {
        format!("{}. {}\r\n", cmd_id, body)
    }
}

/// Writes one framed line, swallowing (but logging) a broken pipe — a
/// superseded/disconnected client shouldn't take down the handler.
pub async fn send_line(writer: &Writer, cmd_id: u64, body: &str) {
    let framed = frame(cmd_id, body);
    let mut guard = writer.lock().await;
    if let Err(e) = guard.write_all(framed.as_bytes()).await {
        log::debug!("write failed on cmd {}: {}", cmd_id, e);
    }
}

pub fn ok(message: Option<&str>) -> String {
    match message {
        Some(m) => format!(">> OK: {}", m),
        None => ">> OK".to_string(),
    }
}

pub fn err(code: u16, message: &str) -> String {
    format!(">> ERR: [{}] {}", code, message)
}

pub fn err_plain(message: &str) -> String {
    format!(">> ERR: {}", message)
}

pub const BYE: &str = ">> BYE!";

/// Decodes a document's stored bytes back to JSON, falling back to a
/// base64 string if they aren't valid JSON (spec §6.1: "`data` is the
/// decoded JSON or base64 fallback").
pub fn decode_data(bytes: &[u8]) -> serde_json::Value {
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(v) => v,
        Err(_) => serde_json::Value::String(base64::encode(bytes)),
    }
}

#[derive(Serialize)]
pub struct SizeHeader {
    pub size: usize,
    pub estimated: u64,
}

pub fn size_header(size: usize, estimated: u64) -> String {
    serde_json::to_string(&SizeHeader { size, estimated }).unwrap_or_default()
}

#[derive(Serialize)]
pub struct FacetRowWire {
    pub facet: String,
    pub term: String,
    pub termfreq: u64,
}

pub fn facet_row(field: &str, term: &str, termfreq: u64) -> String {
    serde_json::to_string(&FacetRowWire {
        facet: field.to_string(),
        term: term.to_string(),
        termfreq,
    })
    .unwrap_or_default()
}

/// Renders one match row (spec §6.1): `data` is included for SEARCH,
/// `terms` for TERMS; both are omitted otherwise.
pub fn match_row(row: &MatchRow, include_data: bool, include_terms: bool) -> String {
    let mut obj = json!({
        "id": row.id,
        "docid": row.docid,
        "rank": row.rank,
        "weight": row.score,
        "percent": row.percent,
    });
    let map = obj.as_object_mut().expect("object literal");
    if include_data {
        map.insert("data".to_string(), decode_data(&row.data));
    }
    if include_terms {
        map.insert("terms".to_string(), json!(row.terms));
    }
    serde_json::to_string(&obj).unwrap_or_default()
}
