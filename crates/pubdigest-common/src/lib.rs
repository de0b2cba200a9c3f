//! pubdigest-common: shared types, errors and key conventions used across the pubdigest crates.

pub mod error;
pub mod keys;
pub mod models;
pub mod questions;

// Re-export commonly used types
pub use error::{DigestError, Result};
pub use models::{ArticleCollection, ArticleRecord, EvidenceMap, SelectedArticle};
pub use questions::{default_clinical_questions, ClinicalQuestion};
