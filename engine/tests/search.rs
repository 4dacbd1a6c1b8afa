//! End-to-end coverage of the query pipeline against a real tantivy index:
//! parse a DSL string, run it through the executor, check the rows that
//! come back. Uses an in-RAM index (a `remote://` endpoint, spec §4.1) so
//! there's no filesystem setup to manage.

use std::sync::Arc;

use xapiand_engine::database::{CompositeDatabase, SingleDatabase};
use xapiand_engine::document::{build_engine_document, parse_index_payload};
use xapiand_engine::endpoint::{Endpoint, Scheme};
use xapiand_engine::query;
use xapiand_engine::{AliveToken, CommandSequence};

fn open_ram_db() -> Arc<SingleDatabase> {
    let endpoint = Endpoint {
        scheme: Scheme::Remote,
        host: "test".to_string(),
        port: 0,
        user: String::new(),
        password: String::new(),
        path: "/mem".to_string(),
    };
    Arc::new(SingleDatabase::open(endpoint, &std::env::temp_dir(), true).unwrap())
}

fn index(db: &SingleDatabase, payload: &str) {
    let parsed = parse_index_payload(payload).unwrap();
    let doc = build_engine_document(&parsed).unwrap();
    db.replace_document(doc).unwrap();
}

fn token() -> AliveToken {
    CommandSequence::new().begin()
}

#[test]
fn free_text_search_finds_matching_document() {
    let db = open_ram_db();
    index(
        &db,
        r#"{"id":"d1","data":{"t":1},"texts":[{"text":"a red bicycle"}]}"#,
    );
    index(
        &db,
        r#"{"id":"d2","data":{"t":2},"texts":[{"text":"a blue scooter"}]}"#,
    );
    db.commit().unwrap();

    let composite = CompositeDatabase::new(vec![db]);
    let parsed = query::parse("bicycle");
    let results = query::execute(&composite, &parsed, &token()).unwrap();

    assert_eq!(results.matches.len(), 1);
    assert_eq!(results.matches[0].id, "d1");
}

#[test]
fn terms_clause_filters_on_boolean_term() {
    let db = open_ram_db();
    index(
        &db,
        r#"{"id":"d1","data":{},"texts":[{"text":"shoe"}],"terms":[{"term":"color:Red"}]}"#,
    );
    index(
        &db,
        r#"{"id":"d2","data":{},"texts":[{"text":"shoe"}],"terms":[{"term":"color:Blue"}]}"#,
    );
    db.commit().unwrap();

    let composite = CompositeDatabase::new(vec![db]);
    let parsed = query::parse("shoe TERMS color:red");
    let results = query::execute(&composite, &parsed, &token()).unwrap();

    assert_eq!(results.matches.len(), 1);
    assert_eq!(results.matches[0].id, "d1");
}

#[test]
fn distinct_collapses_duplicate_keys_to_best_ranked_hit() {
    let db = open_ram_db();
    index(
        &db,
        r#"{"id":"d1","data":{},"texts":[{"text":"hat"}],"values":{"sku":"same"}}"#,
    );
    index(
        &db,
        r#"{"id":"d2","data":{},"texts":[{"text":"hat"}],"values":{"sku":"same"}}"#,
    );
    index(
        &db,
        r#"{"id":"d3","data":{},"texts":[{"text":"hat"}],"values":{"sku":"other"}}"#,
    );
    db.commit().unwrap();

    let composite = CompositeDatabase::new(vec![db]);
    let parsed = query::parse("hat DISTINCT sku");
    let results = query::execute(&composite, &parsed, &token()).unwrap();

    assert_eq!(results.matches.len(), 2);
}

#[test]
fn order_by_sorts_numerically_on_the_chosen_value() {
    let db = open_ram_db();
    index(
        &db,
        r#"{"id":"cheap","data":{},"texts":[{"text":"widget"}],"values":{"price":5}}"#,
    );
    index(
        &db,
        r#"{"id":"pricey","data":{},"texts":[{"text":"widget"}],"values":{"price":50}}"#,
    );
    db.commit().unwrap();

    let composite = CompositeDatabase::new(vec![db]);
    let parsed = query::parse("widget ORDER BY price DESC");
    let results = query::execute(&composite, &parsed, &token()).unwrap();

    let ids: Vec<_> = results.matches.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["pricey", "cheap"]);
}

/// FACETS forces `maxitems = 0` at the dispatcher (spec §6.1, "terminated
/// by `>> OK: 0 documents found`"); facet rows must still be populated from
/// every matched candidate even though the returned page is empty.
#[test]
fn facets_are_tallied_even_when_maxitems_is_forced_to_zero() {
    let db = open_ram_db();
    index(
        &db,
        r#"{"id":"d1","data":{},"texts":[{"text":"shirt"}],"terms":[{"term":"color:red"}]}"#,
    );
    index(
        &db,
        r#"{"id":"d2","data":{},"texts":[{"text":"shirt"}],"terms":[{"term":"color:red"}]}"#,
    );
    index(
        &db,
        r#"{"id":"d3","data":{},"texts":[{"text":"shirt"}],"terms":[{"term":"color:blue"}]}"#,
    );
    db.commit().unwrap();

    let composite = CompositeDatabase::new(vec![db]);
    let mut parsed = query::parse("shirt FACETS color");
    parsed.maxitems = 0;
    let results = query::execute(&composite, &parsed, &token()).unwrap();

    assert!(results.matches.is_empty());
    let red = results
        .facets
        .iter()
        .find(|f| f.field == "color" && f.value == "red")
        .expect("red facet present");
    assert_eq!(red.count, 2);
    let blue = results
        .facets
        .iter()
        .find(|f| f.field == "color" && f.value == "blue")
        .expect("blue facet present");
    assert_eq!(blue.count, 1);
}

/// A `texts[].prefix` entry should land as a literal upper-cased
/// `boolean_terms` marker (e.g. prefix `title` + token `ring` ->
/// `TITLEring`), filterable through TERMS like any other boolean term.
#[test]
fn text_prefix_produces_a_filterable_boolean_term() {
    let db = open_ram_db();
    index(
        &db,
        r#"{"id":"d1","data":{},"texts":[{"text":"silver ring","prefix":"title"}]}"#,
    );
    index(
        &db,
        r#"{"id":"d2","data":{},"texts":[{"text":"gold necklace","prefix":"title"}]}"#,
    );
    db.commit().unwrap();

    let composite = CompositeDatabase::new(vec![db]);
    let parsed = query::parse("TERMS TITLEring");
    let results = query::execute(&composite, &parsed, &token()).unwrap();

    assert_eq!(results.matches.len(), 1);
    assert_eq!(results.matches[0].id, "d1");
}

/// `positions: false` routes a `texts[]` entry to the non-positional
/// `text_nopos` field instead of `text`; free-text search must still find
/// it since both fields are queried together.
#[test]
fn non_positional_text_is_still_searchable() {
    let db = open_ram_db();
    index(
        &db,
        r#"{"id":"d1","data":{},"texts":[{"text":"wireless keyboard","positions":false}]}"#,
    );
    db.commit().unwrap();

    let composite = CompositeDatabase::new(vec![db]);
    let parsed = query::parse("keyboard");
    let results = query::execute(&composite, &parsed, &token()).unwrap();

    assert_eq!(results.matches.len(), 1);
    assert_eq!(results.matches[0].id, "d1");
}

/// Without `spelling`, a recognized `language` stems away the literal form
/// (here "running" -> "run"), so the original unstemmed term no longer
/// matches on its own; the stemmed form still does.
#[test]
fn stemming_without_spelling_drops_the_literal_form() {
    let db = open_ram_db();
    index(
        &db,
        r#"{"id":"d1","data":{},"texts":[{"text":"running shoes","language":"english","spelling":false}]}"#,
    );
    db.commit().unwrap();

    let composite = CompositeDatabase::new(vec![db]);

    let stemmed = query::parse("run");
    let results = query::execute(&composite, &stemmed, &token()).unwrap();
    assert_eq!(results.matches.len(), 1);

    let literal = query::parse("running");
    let results = query::execute(&composite, &literal, &token()).unwrap();
    assert!(results.matches.is_empty());
}

/// With `spelling` set, the raw unstemmed form is kept alongside the
/// stemmed one, so both the literal and stemmed query terms match.
#[test]
fn stemming_with_spelling_keeps_both_forms() {
    let db = open_ram_db();
    index(
        &db,
        r#"{"id":"d1","data":{},"texts":[{"text":"running shoes","language":"english","spelling":true}]}"#,
    );
    db.commit().unwrap();

    let composite = CompositeDatabase::new(vec![db]);

    let stemmed = query::parse("run");
    assert_eq!(query::execute(&composite, &stemmed, &token()).unwrap().matches.len(), 1);

    let literal = query::parse("running");
    assert_eq!(query::execute(&composite, &literal, &token()).unwrap().matches.len(), 1);
}

#[test]
fn composite_database_searches_across_all_sub_indexes() {
    let db_a = open_ram_db();
    index(&db_a, r#"{"id":"a1","data":{},"texts":[{"text":"kettle"}]}"#);
    db_a.commit().unwrap();

    let db_b = open_ram_db();
    index(&db_b, r#"{"id":"b1","data":{},"texts":[{"text":"kettle"}]}"#);
    db_b.commit().unwrap();

    let composite = CompositeDatabase::new(vec![db_a, db_b]);
    let parsed = query::parse("kettle");
    let results = query::execute(&composite, &parsed, &token()).unwrap();

    let mut ids: Vec<_> = results.matches.iter().map(|m| m.id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["a1".to_string(), "b1".to_string()]);
}
