//! Document (input) model and the index JSON parser (spec §3, §4.6, §6.2).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::slot;

/// One `terms[]` entry of an INDEX payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TermSpec {
    pub term: String,
    #[serde(default)]
    pub weight: Option<i64>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub position: Option<u32>,
}

/// One `texts[]` entry of an INDEX payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TextSpec {
    pub text: String,
    #[serde(default)]
    pub weight: Option<i64>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub spelling: Option<bool>,
    #[serde(default)]
    pub positions: Option<bool>,
}

/// The parsed, validated INDEX payload (spec §6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDocument {
    pub id: String,
    pub data: Json,
    pub values: hashbrown::HashMap<String, Json>,
    pub terms: Vec<TermSpec>,
    pub texts: Vec<TextSpec>,
    pub endpoints: Vec<String>,
    pub language: Option<String>,
    pub spelling: bool,
    pub positions: bool,
}

#[derive(Debug, Deserialize)]
struct RawInputDocument {
    id: Option<Json>,
    data: Option<Json>,
    #[serde(default)]
    values: hashbrown::HashMap<String, Json>,
    #[serde(default)]
    terms: Vec<TermSpec>,
    #[serde(default)]
    texts: Vec<TextSpec>,
    #[serde(default)]
    endpoints: Vec<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    spelling: bool,
    // Positional indexing is the ordinary case (Xapian's `index_text`
    // records positions unless told not to); only an explicit `false`
    // should route a document's texts to the non-positional field.
    #[serde(default = "default_positions")]
    positions: bool,
}

fn default_positions() -> bool {
    true
}

/// Parses and validates a raw INDEX/CINDEX JSON payload.
///
/// On error, returns a human-readable string beginning with `">> ERR: [400]
/// ..."`, matching the original implementation's convention (spec §4.6) so
/// the dispatcher can forward it to the client unmodified.
pub fn parse_index_payload(raw: &str) -> std::result::Result<InputDocument, String> {
    let parsed: RawInputDocument = serde_json::from_str(raw)
        .map_err(|e| format!(">> ERR: [400] {}", e))?;

    let id = match parsed.id {
        Some(Json::String(s)) if !s.is_empty() => s,
        Some(other) => other.to_string(),
        None => return Err(">> ERR: [400] Document must have an 'id'".to_string()),
    };

    let data = match parsed.data {
        Some(d) => d,
        None => return Err(">> ERR: [400] You must provide 'data' to index".to_string()),
    };

    Ok(InputDocument {
        id,
        data,
        values: parsed.values,
        terms: parsed.terms,
        texts: parsed.texts,
        endpoints: parsed.endpoints,
        language: parsed.language,
        spelling: parsed.spelling,
        positions: parsed.positions,
    })
}

/// A value coerced to one of the scalar kinds the `values` blob can store
/// (spec §3 "Document (input)": `values: map<name, scalar>`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StoredValue {
    Str(String),
    I64(i64),
    F64(f64),
    Bool(bool),
}

impl StoredValue {
    pub fn from_json(v: &Json) -> Result<Self> {
        match v {
            Json::String(s) => Ok(StoredValue::Str(s.clone())),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(StoredValue::I64(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(StoredValue::F64(f))
                } else {
                    anyhow::bail!("unsupported numeric value")
                }
            }
            Json::Bool(b) => Ok(StoredValue::Bool(*b)),
            other => anyhow::bail!("unsupported value type for value slot: {}", other),
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            StoredValue::Str(s) => Json::String(s.clone()),
            StoredValue::I64(i) => Json::from(*i),
            StoredValue::F64(f) => Json::from(*f),
            StoredValue::Bool(b) => Json::Bool(*b),
        }
    }

    /// A serialization usable as a sort/range key: strings sort lexically,
    /// numbers sort numerically after being bit-cast into a comparable u64.
    pub fn sort_key(&self) -> Vec<u8> {
        match self {
            StoredValue::Str(s) => s.as_bytes().to_vec(),
            StoredValue::I64(i) => (*i as f64).to_be_bytes().to_vec(),
            StoredValue::F64(f) => f.to_be_bytes().to_vec(),
            StoredValue::Bool(b) => vec![*b as u8],
        }
    }
}

/// One free/boolean term ready to hand to the façade, after slot/prefix
/// resolution (spec §4.4 "Index operation semantics").
#[derive(Debug, Clone)]
pub struct ResolvedTerm {
    pub text: String,
    pub is_boolean: bool,
    pub weight: i64,
    pub position: Option<u32>,
}

/// Resolves a single `terms[]` entry into the prefixed term text plus
/// whether it's boolean (mixed-case field name) or free/weighted
/// (lowercase field name), per spec §4.4:
///
/// > For each `terms` entry with `field:term` parse: if field name is
/// > all-lowercase, case-fold the term and add as a free (weighted)
/// > posting under `X<slothex>:`; otherwise treat as boolean and add the
/// > unmodified term.
pub fn resolve_term(spec: &TermSpec) -> ResolvedTerm {
    let weight = spec.weight.unwrap_or(1);
    match spec.term.split_once(':') {
        Some((field, term)) if !field.is_empty() => {
            let prefix = slot::field_prefix(field);
            if field.chars().all(|c| c.is_lowercase() || !c.is_alphabetic()) {
                ResolvedTerm {
                    text: format!("{}{}", prefix, term.to_lowercase()),
                    is_boolean: false,
                    weight,
                    position: spec.position,
                }
            } else {
                ResolvedTerm {
                    text: format!("{}{}", prefix, term),
                    is_boolean: true,
                    weight,
                    position: spec.position,
                }
            }
        }
        _ => ResolvedTerm {
            text: spec.term.clone(),
            is_boolean: true,
            weight,
            position: spec.position,
        },
    }
}

/// Resolves the values map into slot ids, rejecting/flattening unsupported
/// value types the same way `InvalidArgumentError` would be swallowed at
/// the writer (spec §4.2): callers are expected to `log::warn!` and skip
/// entries that fail here, not abort the whole document.
pub fn resolve_values(
    values: &hashbrown::HashMap<String, Json>,
) -> Vec<(u32, StoredValue)> {
    let mut out = Vec::with_capacity(values.len());
    for (name, v) in values {
        match StoredValue::from_json(v) {
            Ok(sv) => out.push((slot::slot(name), sv)),
            Err(e) => {
                log::warn!("skipping unsupported value for field {}: {}", name, e);
            }
        }
    }
    out
}

/// A `terms[]` entry resolved down to a free (weighted) posting, as
/// opposed to the exact boolean terms that land straight in
/// `EngineDocument::boolean_terms` (spec §4.4).
#[derive(Debug, Clone)]
pub struct FreeTerm {
    pub text: String,
    pub weight: i64,
    pub position: Option<u32>,
}

/// A `texts[]` entry resolved with its per-entry (or document-default)
/// flags, ready for the façade to run through its term generator
/// equivalent (spec §3 "Internal engine document", §4.4).
#[derive(Debug, Clone)]
pub struct FreeText {
    pub text: String,
    pub weight: i64,
    pub prefix: Option<String>,
    pub language: Option<String>,
    pub spelling: bool,
    pub positions: bool,
}

/// Resolves a parsed [`InputDocument`] into the façade-ready
/// [`crate::database::EngineDocument`] (spec §4.4 "Index operation
/// semantics"). The unique-key boolean term (`Q<id>`) is added by
/// [`crate::database::SingleDatabase::replace_document`] itself, not
/// here, so it isn't duplicated.
pub fn build_engine_document(doc: &InputDocument) -> anyhow::Result<crate::database::EngineDocument> {
    let mut values: std::collections::BTreeMap<u32, StoredValue> =
        resolve_values(&doc.values).into_iter().collect();
    values.insert(slot::ID_SLOT, StoredValue::Str(doc.id.clone()));

    let mut boolean_terms = Vec::with_capacity(doc.terms.len());
    let mut free_terms = Vec::new();
    for term in &doc.terms {
        let resolved = resolve_term(term);
        if resolved.is_boolean {
            boolean_terms.push(resolved.text);
        } else {
            free_terms.push(FreeTerm {
                text: resolved.text,
                weight: resolved.weight,
                position: resolved.position,
            });
        }
    }

    let free_texts = doc
        .texts
        .iter()
        .map(|t| FreeText {
            text: t.text.clone(),
            weight: t.weight.unwrap_or(1),
            prefix: t.prefix.clone(),
            language: t.language.clone().or_else(|| doc.language.clone()),
            spelling: t.spelling.unwrap_or(doc.spelling),
            positions: t.positions.unwrap_or(doc.positions),
        })
        .collect();

    let data = serde_json::to_vec(&doc.data)?;

    Ok(crate::database::EngineDocument {
        id: doc.id.clone(),
        data,
        values,
        boolean_terms,
        free_terms,
        free_texts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_id_is_rejected() {
        let err = parse_index_payload(r#"{"data":{"a":1}}"#).unwrap_err();
        assert!(err.starts_with(">> ERR: [400]"));
    }

    #[test]
    fn missing_data_is_rejected() {
        let err = parse_index_payload(r#"{"id":"d1"}"#).unwrap_err();
        assert!(err.starts_with(">> ERR: [400]"));
    }

    #[test]
    fn minimal_document_parses() {
        let doc = parse_index_payload(r#"{"id":"d1","data":{"t":"hello"}}"#).unwrap();
        assert_eq!(doc.id, "d1");
    }

    #[test]
    fn lowercase_field_term_is_free_and_casefolded() {
        let resolved = resolve_term(&TermSpec {
            term: "color:RED".to_string(),
            weight: None,
            prefix: None,
            position: None,
        });
        assert!(!resolved.is_boolean);
        assert!(resolved.text.ends_with("red"));
    }

    #[test]
    fn mixedcase_field_term_is_boolean_and_unmodified() {
        let resolved = resolve_term(&TermSpec {
            term: "Category:Foo".to_string(),
            weight: None,
            prefix: None,
            position: None,
        });
        assert!(resolved.is_boolean);
        assert!(resolved.text.ends_with("Foo"));
    }

    #[test]
    fn bare_term_without_field_is_boolean_unmodified() {
        let resolved = resolve_term(&TermSpec {
            term: "hello".to_string(),
            weight: None,
            prefix: None,
            position: None,
        });
        assert!(resolved.is_boolean);
        assert_eq!(resolved.text, "hello");
    }

    #[test]
    fn engine_document_stores_id_at_fixed_slot() {
        let doc = parse_index_payload(r#"{"id":"d1","data":{"t":"hi"}}"#).unwrap();
        let engine_doc = build_engine_document(&doc).unwrap();
        assert_eq!(
            engine_doc.values.get(&slot::ID_SLOT),
            Some(&StoredValue::Str("d1".to_string()))
        );
    }

    #[test]
    fn terms_split_into_boolean_and_free_by_field_case() {
        let doc = parse_index_payload(
            r#"{"id":"d1","data":{},"terms":[{"term":"color:red"},{"term":"Category:Shoes"},{"term":"plain"}]}"#,
        )
        .unwrap();
        let engine_doc = build_engine_document(&doc).unwrap();

        assert_eq!(engine_doc.free_terms.len(), 1);
        assert!(engine_doc.free_terms[0].text.ends_with("red"));

        assert_eq!(engine_doc.boolean_terms.len(), 2);
        assert!(engine_doc.boolean_terms.iter().any(|t| t.ends_with("Shoes")));
        assert!(engine_doc.boolean_terms.iter().any(|t| t == "plain"));
    }

    #[test]
    fn free_text_inherits_document_level_defaults_when_entry_omits_them() {
        let doc = parse_index_payload(
            r#"{"id":"d1","data":{},"language":"english","spelling":true,"positions":false,
               "texts":[{"text":"running shoes"},{"text":"blue hat","language":"french","positions":true}]}"#,
        )
        .unwrap();
        let engine_doc = build_engine_document(&doc).unwrap();

        assert_eq!(engine_doc.free_texts.len(), 2);
        let inherited = &engine_doc.free_texts[0];
        assert_eq!(inherited.language.as_deref(), Some("english"));
        assert!(inherited.spelling);
        assert!(!inherited.positions);

        let overridden = &engine_doc.free_texts[1];
        assert_eq!(overridden.language.as_deref(), Some("french"));
        assert!(overridden.positions);
    }

    #[test]
    fn free_text_weight_and_prefix_default_when_entry_omits_them() {
        let doc = parse_index_payload(r#"{"id":"d1","data":{},"texts":[{"text":"hello"}]}"#).unwrap();
        let engine_doc = build_engine_document(&doc).unwrap();

        assert_eq!(engine_doc.free_texts[0].weight, 1);
        assert!(engine_doc.free_texts[0].prefix.is_none());
    }
}
