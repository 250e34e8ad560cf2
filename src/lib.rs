//! # withy
//!
//! A library for extracting table-level lineage from the JSON that DuckDB's
//! `json_serialize_sql()` produces, and for rendering it as Mermaid diagrams.
//!
//! # Features
//!
//! - Validate a `json_serialize_sql()` response and narrow it into a typed tree,
//!   ignoring any field or node shape that is not modeled.
//! - Build one lineage graph per statement: which base tables, CTEs, subqueries
//!   (in FROM and in expression position) and table functions feed which select.
//! - Keep join metadata (join type, USING / ON columns, side aliases) and tag
//!   every edge under a UNION/INTERSECT/EXCEPT branch with its side.
//! - Render each graph as a Mermaid flowchart with one shape and color per node kind.
//!
//! # Example
//!
//! ```rust,no_run
//! use withy::{lineage::extract_lineage, mermaid::lineage_to_mermaid, parser::parse_serialized_sql};
//!
//! fn main() -> anyhow::Result<()> {
//!     env_logger::init();
//!
//!     // SELECT a FROM t
//!     let json = r#"{
//!         "error": false,
//!         "statements": [{
//!             "node": {
//!                 "type": "SELECT_NODE",
//!                 "cte_map": {"map": []},
//!                 "select_list": [{"class": "COLUMN_REF", "type": "COLUMN_REF", "column_names": ["a"]}],
//!                 "from_table": {"type": "BASE_TABLE", "table_name": "t", "alias": ""}
//!             }
//!         }]
//!     }"#;
//!
//!     let serialized = parse_serialized_sql(json)?;
//!     for lineage in extract_lineage(&serialized.statements) {
//!         println!("{}", serde_json::to_string_pretty(&lineage)?);
//!         println!("{}", lineage_to_mermaid(&lineage));
//!     }
//!     Ok(())
//! }
//! ```
pub mod ast;
pub mod lineage;
pub mod mermaid;
pub mod parser;
