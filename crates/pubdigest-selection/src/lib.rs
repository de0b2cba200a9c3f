//! pubdigest-selection: token-bounded batching and multi-stage model selection.
//!
//! Articles are split into chunks that fit a prompt budget, each chunk is sent
//! to the model, partial answers are merged and deduplicated by PMID, and an
//! optional final pass cuts the merged list down to a hard cap.

pub mod chunker;
pub mod dedup;
pub mod parse;
pub mod pipeline;
pub mod prompts;

pub use chunker::{chunk, plan_chunks, Chunk, TokenBudget};
pub use dedup::{merge_candidates, Identified};
pub use parse::{candidates_from_value, extract_json, Shape};
pub use pipeline::{
    EvidenceOutcome, FinalPass, FinalPassStatus, FinalRender, FinalStage, SelectionOutcome, SelectionPipeline,
    SelectionReport, SkippedChunk,
};
pub use prompts::{CallSettings, PromptVariant};
