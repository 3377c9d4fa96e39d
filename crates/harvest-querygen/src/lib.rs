//! Harvest QueryGen - one generated question per dataset row
//!
//! Rows of a CSV dataset (optionally a seeded, persisted sample of them) are
//! spread over a pool of workers. Each worker owns its own chat-completions
//! client, every answer lands in `cache_result.jsonl`, and `results.csv` is
//! rebuilt from that log at the end of every run.

pub mod config;
pub mod dataset;
pub mod generator;
pub mod llm;
pub mod transform;

// Re-exports
pub use config::{LlmConfig, QueryGenConfig, ResponseMode};
pub use dataset::{RowItem, load_rows};
pub use generator::{GenerateReport, generate, generate_with};
pub use llm::{Reply, Sampling, StructuredLlm, parse_question, split_reasoning};
pub use transform::ResultsProjection;
