//! Token estimation for prompt budgeting.
//!
//! Counts are estimates: they only need to be deterministic and close enough
//! to the model tokenizer that a 4000-token chunk budget leaves headroom in an
//! 8k context. When a Hugging Face `tokenizer.json` is configured the count is
//! exact for that vocabulary.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use pubdigest_common::{DigestError, Result};
use regex::Regex;
use tokenizers::Tokenizer;
use tracing::{info, warn};

/// BPE vocabulary family a model uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Cl100kBase,
    O200kBase,
}

impl Encoding {
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Cl100kBase => "cl100k_base",
            Encoding::O200kBase => "o200k_base",
        }
    }
}

/// Map a model id to its encoding. `None` for unknown families.
pub fn encoding_for_model(model: &str) -> Option<Encoding> {
    let m = model.trim().to_ascii_lowercase();
    let m = m.rsplit('/').next().unwrap_or(&m);

    const O200K: &[&str] = &["gpt-4o", "gpt-4.1", "chatgpt-4o", "o1", "o3", "o4"];
    const CL100K: &[&str] = &["gpt-4", "gpt-3.5", "text-embedding-3", "text-embedding-ada-002"];

    if O200K.iter().any(|p| m.starts_with(p)) {
        Some(Encoding::O200kBase)
    } else if CL100K.iter().any(|p| m.starts_with(p)) {
        Some(Encoding::Cl100kBase)
    } else {
        None
    }
}

fn piece_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\p{L}+|\p{N}{1,3}|[^\s\p{L}\p{N}]+|\s+").expect("valid regex")
    })
}

#[derive(Clone)]
pub struct TokenEstimator {
    model: String,
    encoding: Encoding,
    tokenizer: Option<Arc<Tokenizer>>,
}

impl fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenEstimator")
            .field("model", &self.model)
            .field("encoding", &self.encoding.name())
            .field("tokenizer", &self.tokenizer.is_some())
            .finish()
    }
}

impl TokenEstimator {
    pub fn for_model(model: &str) -> Result<Self> {
        let encoding = encoding_for_model(model).ok_or_else(|| {
            DigestError::Config(format!("no token encoding known for model '{model}'"))
        })?;
        Ok(Self { model: model.to_string(), encoding, tokenizer: None })
    }

    /// Use an exact Hugging Face tokenizer instead of the heuristic.
    pub fn with_tokenizer_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            DigestError::Config(format!("failed to load tokenizer {}: {e}", path.display()))
        })?;
        info!(path = %path.display(), "Loaded tokenizer for exact token counts");
        self.tokenizer = Some(Arc::new(tokenizer));
        Ok(self)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn count(&self, text: &str) -> usize {
        if let Some(tok) = &self.tokenizer {
            match tok.encode(text, false) {
                Ok(enc) => return enc.get_ids().len(),
                Err(e) => warn!(error = %e, "Tokenizer failed, using heuristic estimate"),
            }
        }
        self.estimate(text)
    }

    fn estimate(&self, text: &str) -> usize {
        piece_regex()
            .find_iter(text)
            .map(|m| self.piece_cost(m.as_str()))
            .sum()
    }

    fn piece_cost(&self, piece: &str) -> usize {
        let Some(first) = piece.chars().next() else {
            return 0;
        };
        let chars = piece.chars().count();

        if first.is_alphabetic() {
            if piece.is_ascii() {
                chars.div_ceil(4).max(1)
            } else {
                match self.encoding {
                    Encoding::Cl100kBase => chars,
                    // the larger vocabulary merges more CJK pairs
                    Encoding::O200kBase => (chars * 3).div_ceil(4).max(1),
                }
            }
        } else if first.is_numeric() {
            1
        } else if first.is_whitespace() {
            if piece == " " { 0 } else { 1 }
        } else {
            chars.div_ceil(2).max(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpt4() -> TokenEstimator {
        TokenEstimator::for_model("gpt-4").unwrap()
    }

    #[test]
    fn test_encoding_families() {
        assert_eq!(encoding_for_model("gpt-4"), Some(Encoding::Cl100kBase));
        assert_eq!(encoding_for_model("gpt-4-0613"), Some(Encoding::Cl100kBase));
        assert_eq!(encoding_for_model("gpt-4o-mini"), Some(Encoding::O200kBase));
        assert_eq!(encoding_for_model("openai/gpt-4.1"), Some(Encoding::O200kBase));
        assert_eq!(encoding_for_model("o3-mini"), Some(Encoding::O200kBase));
        assert_eq!(encoding_for_model("llama3"), None);
    }

    #[test]
    fn test_unknown_model_is_configuration_error() {
        let err = TokenEstimator::for_model("claude-mystery").unwrap_err();
        assert_eq!(err.kind(), "ConfigurationError");
    }

    #[test]
    fn test_empty_text_is_zero() {
        assert_eq!(gpt4().count(""), 0);
    }

    #[test]
    fn test_simple_counts() {
        let est = gpt4();
        // "Hello" -> 2, " " -> 0, "world" -> 2
        assert_eq!(est.count("Hello world"), 4);
        // "PMID" 1, ":" 1, " " 0, "123" 1, "45" 1
        assert_eq!(est.count("PMID: 12345"), 4);
        // "\n\n" is one whitespace run
        assert_eq!(est.count("a\n\nb"), 3);
    }

    #[test]
    fn test_non_ascii_costs_more_per_char() {
        let est = gpt4();
        assert_eq!(est.count("敗血症"), 3);
        let o200k = TokenEstimator::for_model("gpt-4o").unwrap();
        assert_eq!(o200k.count("敗血症"), 3);
        assert_eq!(o200k.count("敗血症性ショック"), 6);
    }

    #[test]
    fn test_deterministic_and_monotonic_in_length() {
        let est = gpt4();
        let text = "Sepsis is a life-threatening organ dysfunction caused by a dysregulated host response.";
        assert_eq!(est.count(text), est.count(text));
        let doubled = format!("{text} {text}");
        assert!(est.count(&doubled) >= 2 * est.count(text));
    }

    #[test]
    fn test_missing_tokenizer_file_is_configuration_error() {
        let err = gpt4().with_tokenizer_file("/nonexistent/tokenizer.json").unwrap_err();
        assert_eq!(err.kind(), "ConfigurationError");
    }
}
