//! The write-command envelope queued per endpoint (spec §4.4, §6.1).
//!
//! Every INDEX/CINDEX/DELETE/CDELETE/COMMIT a dispatcher accepts is
//! turned into one [`WriteEnvelope`] and handed to that endpoint's
//! [`crate::queue::DurableQueue`]; the writer loop is the only reader.

use serde::{Deserialize, Serialize};

use crate::document::InputDocument;
use crate::endpoint::Endpoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WriteOp {
    Index { doc: InputDocument, commit: bool },
    Delete { id: String, commit: bool },
    Commit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteEnvelope {
    pub endpoint: Endpoint,
    pub op: WriteOp,
}

impl WriteEnvelope {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_index_payload;

    #[test]
    fn envelope_round_trips_through_bytes() {
        let doc = parse_index_payload(r#"{"id":"d1","data":{"t":"hi"}}"#).unwrap();
        let envelope = WriteEnvelope {
            endpoint: Endpoint::parse("/tmp/a").unwrap(),
            op: WriteOp::Index { doc, commit: false },
        };
        let bytes = envelope.encode().unwrap();
        let decoded = WriteEnvelope::decode(&bytes).unwrap();
        match decoded.op {
            WriteOp::Index { doc, .. } => assert_eq!(doc.id, "d1"),
            _ => panic!("wrong variant"),
        }
    }
}
