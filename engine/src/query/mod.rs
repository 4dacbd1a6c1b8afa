//! The query subsystem: DSL parsing (spec §4.6) and search execution
//! (spec §4.7).

pub mod executor;
pub mod parser;

pub use executor::{execute, FacetRow, MatchRow, SearchResults};
pub use parser::{parse, ParsedQuery};
