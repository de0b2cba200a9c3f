//! pubdigest-ingestion: retrieval of article records from literature APIs.
//!
//! The only production source is PubMed E-utilities (`esearch` for ids,
//! `efetch` for records). [`sources::StaticSource`] serves fixed records for
//! tests and offline runs.

pub mod sources;

pub use sources::pubmed::PubMedClient;
pub use sources::{LiteratureSource, StaticSource};
