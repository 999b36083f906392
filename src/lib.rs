//! Call-graph analysis for multi-language projects.
//!
//! [`analysis::Analyzer`] walks a project root, parses each supported file
//! into a fragment (reusing [`cache::ContentCache`] entries when the content
//! hash is unchanged), resolves a global symbol table, links call sites, and
//! assembles one [`model::AnalysisResult`] document.

pub mod analysis;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod progress;
pub mod source;
pub mod util;

pub use analysis::{AnalysisOutput, Analyzer, analyze_project};
pub use error::{AnalysisError, SchemaError, SourceError};
pub use model::{AnalysisResult, SCHEMA_VERSION};
