//! Search execution (spec §4.7): turns a [`ParsedQuery`] into a tantivy
//! query against a [`CompositeDatabase`], merges per-endpoint hit lists,
//! applies sort/offset/limit, and tallies facets, checking an
//! [`AliveToken`] between rows so a superseded command stops early.

use std::collections::BTreeMap;

use tantivy::query::{BooleanQuery, Occur, Query};
use tantivy::Score;

use crate::cancel::AliveToken;
use crate::database::{run_query, CompositeDatabase};
use crate::document::StoredValue;
use crate::query::parser::ParsedQuery;
use crate::slot;

#[derive(Debug, Clone)]
pub struct MatchRow {
    pub id: String,
    pub docid: u32,
    /// Position within the returned page, offset already applied (spec
    /// §6.1 match row field `rank`).
    pub rank: usize,
    pub score: Score,
    /// `weight` scaled against the page's highest score (spec §6.1 match
    /// row field `percent`); 100 when every row scores zero.
    pub percent: i32,
    pub data: Vec<u8>,
    pub terms: Vec<String>,
    pub values: BTreeMap<u32, StoredValue>,
}

#[derive(Debug, Clone)]
pub struct FacetRow {
    pub field: String,
    pub value: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    /// Estimated total match count, reported as the size header (spec
    /// §6.1/§6.6) before any rows are streamed.
    pub size_estimate: u64,
    pub matches: Vec<MatchRow>,
    pub facets: Vec<FacetRow>,
}

/// Builds the combined query for a parsed SEARCH string against one
/// sub-index: `SEARCH` (free text, OR-combined internally by the query
/// parser) AND `TERMS` (boolean filters) OR'd with any `PARTIAL`
/// autocomplete clauses.
fn build_query(sub: &crate::database::SingleDatabase, parsed: &ParsedQuery) -> Box<dyn Query> {
    let mut must: Vec<(Occur, Box<dyn Query>)> = Vec::new();

    if let Some(search) = &parsed.search {
        must.push((Occur::Must, sub.free_text_query(search)));
    }

    if let Some(terms) = &parsed.terms {
        for raw in terms.split(|c: char| c.is_whitespace() || c == ',') {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let term = match raw.split_once(':') {
                Some((field, value)) => format!("{}{}", slot::field_prefix(field), value),
                None => raw.to_string(),
            };
            must.push((Occur::Must, sub.boolean_term_query(&term)));
        }
    }

    if !parsed.partials.is_empty() {
        let mut should: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for partial in &parsed.partials {
            let seed = partial.trim_end_matches('*');
            if !seed.is_empty() {
                should.push((Occur::Should, sub.prefix_query(seed)));
            }
        }
        if !should.is_empty() {
            must.push((Occur::Must, Box::new(BooleanQuery::from(should))));
        }
    }

    if must.is_empty() {
        return Box::new(tantivy::query::AllQuery);
    }
    if must.len() == 1 {
        return must.into_iter().next().unwrap().1;
    }
    Box::new(BooleanQuery::from(must))
}

/// Compares two documents' sort keys per spec §9's resolution: each field
/// may carry its own leading `-` to reverse just that field, and a
/// trailing DESC in the original clause inverts the whole comparison.
fn compare_by_sort_fields(
    a: &BTreeMap<u32, StoredValue>,
    b: &BTreeMap<u32, StoredValue>,
    fields: &[String],
    reversed: bool,
) -> std::cmp::Ordering {
    for field in fields {
        let (name, field_desc) = match field.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (field.as_str(), false),
        };
        let slot_id = slot::slot(name);
        let ka = a.get(&slot_id).map(|v| v.sort_key());
        let kb = b.get(&slot_id).map(|v| v.sort_key());
        let mut ord = ka.cmp(&kb);
        if field_desc {
            ord = ord.reverse();
        }
        if ord != std::cmp::Ordering::Equal {
            return if reversed { ord.reverse() } else { ord };
        }
    }
    std::cmp::Ordering::Equal
}

/// Runs the parsed query and assembles the full result set. `maxitems`
/// and `check_at_least` are clamped to the parser's own defaults
/// (10,000) even when a caller-supplied value is larger, so a runaway
/// SEARCH clause can't force the executor to materialize an unbounded
/// result set.
pub fn execute(
    db: &CompositeDatabase,
    parsed: &ParsedQuery,
    alive: &AliveToken,
) -> anyhow::Result<SearchResults> {
    let maxitems = parsed.maxitems.min(crate::query::parser::DEFAULT_MAXITEMS);
    // Floor first (never check fewer than the page we must return), then
    // ceiling against both the parser's own cap and the actual doccount
    // (spec §8 invariant #8: `0 <= check_at_least <= min(10000, doccount)`).
    // Doing the `.max()` before the `.min()`s, not after, is what keeps the
    // result from ever exceeding either cap.
    let doccount = db.get_doccount() as usize;
    let check_at_least = parsed
        .check_at_least
        .max(parsed.offset + maxitems)
        .min(crate::query::parser::DEFAULT_CHECK_AT_LEAST)
        .min(doccount);

    let mut candidates: Vec<(Score, usize, tantivy::DocAddress)> = Vec::new();
    let mut size_estimate: u64 = 0;

    for (idx, sub) in db.subs().iter().enumerate() {
        alive.check()?;
        let query = build_query(sub, parsed);
        let searcher = sub.searcher();
        let hits = run_query(&searcher, query.as_ref(), check_at_least.max(1), 0)?;
        size_estimate += hits.len() as u64;
        for (score, addr) in hits {
            candidates.push((score, idx, addr));
        }
    }

    alive.check()?;

    if let Some(sort_fields) = &parsed.sort_by {
        let mut decorated = Vec::with_capacity(candidates.len());
        for (score, idx, addr) in candidates {
            let searcher = db.subs()[idx].searcher();
            let doc = searcher.doc(addr)?;
            let retrieved = db.subs()[idx].to_retrieved(&doc, addr.doc_id());
            decorated.push((retrieved.values, score, idx, addr));
        }
        decorated.sort_by(|a, b| {
            compare_by_sort_fields(&a.0, &b.0, sort_fields, parsed.sort_by_reversed)
        });
        candidates = decorated.into_iter().map(|(_, s, i, a)| (s, i, a)).collect();
    } else {
        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    }

    // DISTINCT (spec §4.6/§4.7): `set_collapse_key(slot)` collapses the
    // ranked list down to the first (best-ranked) hit per distinct key,
    // using the chosen field (default `id`) before offset/limit windowing.
    if let Some(field) = &parsed.distinct {
        let key_slot = if field.is_empty() {
            slot::ID_SLOT
        } else {
            slot::slot(field)
        };
        let mut seen = std::collections::HashSet::new();
        let mut collapsed = Vec::with_capacity(candidates.len());
        for (score, idx, addr) in candidates {
            let searcher = db.subs()[idx].searcher();
            let doc = searcher.doc(addr)?;
            let retrieved = db.subs()[idx].to_retrieved(&doc, addr.doc_id());
            let key = retrieved
                .values
                .get(&key_slot)
                .map(|v| v.sort_key())
                .unwrap_or_default();
            if seen.insert(key) {
                collapsed.push((score, idx, addr));
            }
        }
        candidates = collapsed;
    }

    // Facet spies tally over every matched candidate, not just the
    // maxitems-windowed page: FACETS forces `maxitems = 0` (spec §6.1,
    // "terminated by `>> OK: 0 documents found`") yet must still emit
    // facet rows, so tallying has to happen before windowing.
    let mut facet_tally: BTreeMap<(String, String), u64> = BTreeMap::new();
    if let Some(facet_fields) = &parsed.facet_fields {
        for (i, (_, idx, addr)) in candidates.iter().enumerate() {
            if i % 16 == 0 {
                alive.check()?;
            }
            let sub = &db.subs()[*idx];
            let searcher = sub.searcher();
            let doc = searcher.doc(*addr)?;
            let retrieved = sub.to_retrieved(&doc, addr.doc_id());
            for field in facet_fields {
                let prefix = slot::field_prefix(field);
                for term in &retrieved.terms {
                    if let Some(value) = term.strip_prefix(&prefix) {
                        *facet_tally
                            .entry((field.clone(), value.to_string()))
                            .or_insert(0) += 1;
                    }
                }
            }
        }
    }

    let page: Vec<_> = candidates
        .into_iter()
        .skip(parsed.offset)
        .take(maxitems)
        .collect();

    let mut matches = Vec::with_capacity(page.len());
    let max_weight = page
        .iter()
        .map(|(score, ..)| *score)
        .fold(0.0_f32, f32::max);

    for (i, (score, idx, addr)) in page.iter().enumerate() {
        if i % 16 == 0 {
            alive.check()?;
        }
        let sub = &db.subs()[*idx];
        let searcher = sub.searcher();
        let doc = searcher.doc(*addr)?;
        let retrieved = sub.to_retrieved(&doc, addr.doc_id());

        let percent = if max_weight > 0.0 {
            ((*score / max_weight) * 100.0).round() as i32
        } else {
            100
        };

        matches.push(MatchRow {
            id: retrieved.id,
            docid: retrieved.docid,
            rank: parsed.offset + i,
            score: *score,
            percent,
            data: retrieved.data,
            terms: retrieved.terms,
            values: retrieved.values,
        });
    }

    let facets = facet_tally
        .into_iter()
        .map(|((field, value), count)| FacetRow { field, value, count })
        .collect();

    Ok(SearchResults {
        size_estimate,
        matches,
        facets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_respects_per_field_sign_and_trailing_reversal() {
        let mut a = BTreeMap::new();
        a.insert(slot::slot("price"), StoredValue::I64(10));
        let mut b = BTreeMap::new();
        b.insert(slot::slot("price"), StoredValue::I64(20));

        let fields = vec!["price".to_string()];
        assert_eq!(
            compare_by_sort_fields(&a, &b, &fields, false),
            std::cmp::Ordering::Less
        );
        assert_eq!(
            compare_by_sort_fields(&a, &b, &fields, true),
            std::cmp::Ordering::Greater
        );

        let fields_desc = vec!["-price".to_string()];
        assert_eq!(
            compare_by_sort_fields(&a, &b, &fields_desc, false),
            std::cmp::Ordering::Greater
        );
    }
}
