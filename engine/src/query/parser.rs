//! The SEARCH query-string DSL parser (spec §4.6, §6.1), grounded in the
//! original implementation's `parser.py::search_parser`: a sequence of
//! keyword-led clauses (`OFFSET`, `LIMIT`, `ORDER BY`, `FACETS`,
//! `PARTIAL`, `TERMS`, `SEARCH`) that can appear in any order, each
//! consuming everything up to the next recognized keyword.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static CMD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(OFFSET|LIMIT|ORDER\s+BY|FACETS|PARTIAL|SEARCH|TERMS|DISTINCT)\b").unwrap()
});
static OFFSET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bOFFSET\s+(\d+)\b").unwrap());
static LIMIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bLIMIT\s+(\d+)\b").unwrap());
static ORDER_BY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bORDER\s+BY\s+([-+_a-zA-Z0-9, ]+?)(?:\s+(ASC|DESC))?\s*$").unwrap()
});
static FACETS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bFACETS\s+(\d+)?\s*([_a-zA-Z0-9, ]+)").unwrap());
static PARTIAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bPARTIAL\s+([_a-zA-Z0-9, *]+)").unwrap());
static TERMS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bTERMS\s+(.+)").unwrap());
static SEARCH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bSEARCH\s+(.+)").unwrap());
static DISTINCT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bDISTINCT\b\s*([_a-zA-Z0-9]*)").unwrap());
static SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*,\s*|\s+").unwrap());

/// Default and max both match the original's `10000` sentinel values.
pub const DEFAULT_MAXITEMS: usize = 10_000;
pub const DEFAULT_CHECK_AT_LEAST: usize = 10_000;

/// The parser's output (spec §4.6). Also the JSON shape accepted as a
/// bypass for the DSL (spec §6.1: "a single JSON object may be supplied
/// in place of the DSL; its fields are the parser output fields"), hence
/// the wire-facing `rename`s below: `first` for the row offset and
/// `facets` for the facet field list, matching the command-table names
/// rather than the internal ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedQuery {
    #[serde(rename = "first", default)]
    pub offset: usize,
    #[serde(default = "default_maxitems")]
    pub maxitems: usize,
    /// `ORDER BY` field list, in precedence order; a leading `-` on a
    /// field name reverses just that field (SPEC_FULL.md §9 resolution:
    /// explicit per-field sign overrides, trailing DESC inverts the
    /// whole comparison).
    #[serde(default)]
    pub sort_by: Option<Vec<String>>,
    #[serde(default)]
    pub sort_by_reversed: bool,
    #[serde(rename = "facets", default)]
    pub facet_fields: Option<Vec<String>>,
    #[serde(default = "default_check_at_least")]
    pub check_at_least: usize,
    #[serde(default)]
    pub partials: Vec<String>,
    #[serde(default)]
    pub terms: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    /// `DISTINCT [<field>]` (spec §4.6/§4.7): `None` means no collapsing;
    /// `Some("")` means `DISTINCT` was given with no field, which collapses
    /// on the default `id` field; `Some(field)` collapses on that field.
    #[serde(default)]
    pub distinct: Option<String>,
}

fn default_maxitems() -> usize {
    DEFAULT_MAXITEMS
}

fn default_check_at_least() -> usize {
    DEFAULT_CHECK_AT_LEAST
}

impl Default for ParsedQuery {
    fn default() -> Self {
        Self {
            offset: 0,
            maxitems: DEFAULT_MAXITEMS,
            sort_by: None,
            sort_by_reversed: false,
            facet_fields: None,
            check_at_least: DEFAULT_CHECK_AT_LEAST,
            partials: Vec::new(),
            terms: None,
            search: None,
            distinct: None,
        }
    }
}

fn split_fields(s: &str) -> Vec<String> {
    SPLIT_RE
        .split(s)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Parses a raw SEARCH argument string into its component clauses.
pub fn parse(query_string: &str) -> ParsedQuery {
    let full = format!("SEARCH {}", query_string);
    let mut boundaries: Vec<usize> = CMD_RE.find_iter(&full).map(|m| m.start()).collect();
    boundaries.push(full.len());

    let mut out = ParsedQuery::default();
    for w in boundaries.windows(2) {
        let clause = &full[w[0]..w[1]];

        if let Some(c) = OFFSET_RE.captures(clause) {
            out.offset = c[1].parse().unwrap_or(out.offset);
        } else if let Some(c) = LIMIT_RE.captures(clause) {
            out.maxitems = c[1].parse().unwrap_or(out.maxitems);
        } else if let Some(c) = ORDER_BY_RE.captures(clause) {
            out.sort_by = Some(split_fields(c[1].trim()));
            out.sort_by_reversed = c
                .get(2)
                .map(|m| m.as_str().eq_ignore_ascii_case("DESC"))
                .unwrap_or(false);
        } else if let Some(c) = FACETS_RE.captures(clause) {
            let fields = split_fields(c.get(2).map_or("", |m| m.as_str()).trim());
            if fields.is_empty() {
                out.check_at_least = 0;
            } else {
                out.check_at_least = c
                    .get(1)
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(out.check_at_least);
                out.facet_fields = Some(fields);
            }
        } else if let Some(c) = PARTIAL_RE.captures(clause) {
            let field = c[1].trim();
            if !field.is_empty() {
                out.partials.push(field.to_string());
            }
        } else if let Some(c) = TERMS_RE.captures(clause) {
            let terms = c[1].trim();
            if !terms.is_empty() {
                out.terms = Some(terms.to_string());
            }
        } else if let Some(c) = SEARCH_RE.captures(clause) {
            let search = c[1].trim();
            if !search.is_empty() {
                out.search = Some(search.to_string());
            }
        } else if let Some(c) = DISTINCT_RE.captures(clause) {
            out.distinct = Some(c.get(1).map_or("", |m| m.as_str()).trim().to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_search_term_is_captured() {
        let q = parse("hello world");
        assert_eq!(q.search.as_deref(), Some("hello world"));
        assert_eq!(q.offset, 0);
        assert_eq!(q.maxitems, DEFAULT_MAXITEMS);
    }

    #[test]
    fn offset_and_limit_are_parsed_independent_of_order() {
        let q = parse("hello LIMIT 20 OFFSET 5");
        assert_eq!(q.offset, 5);
        assert_eq!(q.maxitems, 20);
        assert_eq!(q.search.as_deref(), Some("hello"));
    }

    #[test]
    fn order_by_desc_sets_reversed_flag() {
        let q = parse("hello ORDER BY price,-rating DESC");
        assert_eq!(q.sort_by, Some(vec!["price".to_string(), "-rating".to_string()]));
        assert!(q.sort_by_reversed);
    }

    #[test]
    fn order_by_without_asc_or_desc_still_parses() {
        let q = parse("hello ORDER BY price");
        assert_eq!(q.sort_by, Some(vec!["price".to_string()]));
        assert!(!q.sort_by_reversed);
    }

    #[test]
    fn order_by_explicit_asc_is_not_reversed() {
        let q = parse("hello ORDER BY price ASC");
        assert_eq!(q.sort_by, Some(vec!["price".to_string()]));
        assert!(!q.sort_by_reversed);
    }

    #[test]
    fn facets_with_fields_sets_check_at_least() {
        let q = parse("hello FACETS 50 color,category");
        assert_eq!(q.facet_fields, Some(vec!["color".to_string(), "category".to_string()]));
        assert_eq!(q.check_at_least, 50);
    }

    #[test]
    fn partial_collects_autocomplete_field() {
        let q = parse("hello PARTIAL title*");
        assert_eq!(q.partials, vec!["title*".to_string()]);
    }

    #[test]
    fn terms_clause_is_captured_separately_from_search() {
        let q = parse("TERMS category:shoes SEARCH red");
        assert_eq!(q.terms.as_deref(), Some("category:shoes"));
        assert_eq!(q.search.as_deref(), Some("red"));
    }

    #[test]
    fn bare_distinct_defaults_to_empty_field() {
        let q = parse("hello DISTINCT");
        assert_eq!(q.distinct.as_deref(), Some(""));
    }

    #[test]
    fn distinct_with_field_is_captured() {
        let q = parse("hello DISTINCT sku");
        assert_eq!(q.distinct.as_deref(), Some("sku"));
    }
}
