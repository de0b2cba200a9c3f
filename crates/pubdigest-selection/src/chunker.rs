//! Greedy, order-preserving token-budget chunker.
//!
//! A new chunk starts when `tokens_so_far + item_tokens + base_overhead`
//! would exceed `max_tokens` and the current chunk is not empty. An item
//! that alone exceeds the budget still gets a chunk of its own.

use pubdigest_llm::TokenEstimator;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    /// Ceiling for one prompt, template included.
    pub max_tokens: usize,
    /// Cost of the prompt template rendered with zero items.
    pub base_overhead: usize,
}

impl TokenBudget {
    pub fn new(max_tokens: usize, base_overhead: usize) -> Self {
        Self { max_tokens, base_overhead }
    }

    /// Room left for items once the template is paid for.
    pub fn available(&self) -> usize {
        self.max_tokens.saturating_sub(self.base_overhead)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<T> {
    pub index: usize,
    pub items: Vec<T>,
    /// Sum of item costs, template excluded.
    pub tokens: usize,
}

impl<T> Chunk<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn prompt_tokens(&self, budget: &TokenBudget) -> usize {
        self.tokens + budget.base_overhead
    }

    /// Only a single-item chunk can be over budget.
    pub fn is_oversized(&self, budget: &TokenBudget) -> bool {
        self.items.len() == 1 && self.prompt_tokens(budget) > budget.max_tokens
    }
}

pub fn chunk<T>(
    items: impl IntoIterator<Item = T>,
    budget: &TokenBudget,
    mut cost: impl FnMut(&T) -> usize,
) -> Vec<Chunk<T>> {
    let mut chunks: Vec<Chunk<T>> = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut acc = 0usize;

    for item in items {
        let tokens = cost(&item);
        if acc + tokens + budget.base_overhead > budget.max_tokens && !current.is_empty() {
            close(&mut chunks, std::mem::take(&mut current), acc, budget);
            acc = 0;
        }
        current.push(item);
        acc += tokens;
    }
    if !current.is_empty() {
        close(&mut chunks, current, acc, budget);
    }

    debug!(chunks = chunks.len(), max_tokens = budget.max_tokens, "Chunked items");
    chunks
}

fn close<T>(chunks: &mut Vec<Chunk<T>>, items: Vec<T>, tokens: usize, budget: &TokenBudget) {
    let chunk = Chunk { index: chunks.len(), items, tokens };
    if chunk.is_oversized(budget) {
        warn!(
            chunk = chunk.index,
            tokens = chunk.prompt_tokens(budget),
            max_tokens = budget.max_tokens,
            "Single item exceeds the chunk budget; sending it alone"
        );
    }
    chunks.push(chunk);
}

/// Measure the empty template, then chunk `items` by their rendered cost.
pub fn plan_chunks<T>(
    items: impl IntoIterator<Item = T>,
    estimator: &TokenEstimator,
    max_tokens: usize,
    empty_prompt: &str,
    render_item: impl Fn(&T) -> String,
) -> (TokenBudget, Vec<Chunk<T>>) {
    let budget = TokenBudget::new(max_tokens, estimator.count(empty_prompt));
    let chunks = chunk(items, &budget, |item| estimator.count(&render_item(item)));
    (budget, chunks)
}
