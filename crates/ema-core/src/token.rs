//! Token estimation.
//!
//! Grounded in `memory/context.rs`'s `TokenCounter` (the shape: one
//! struct, a `count` and a `count_many`) and in `elisplash-paw`'s
//! `Tokenizer::count_tokens_for_messages` (the fixed per-message
//! overhead). Unlike either, this backs its estimate with a genuine
//! cl100k_base BPE encoder via `tiktoken-rs` and only falls back to a
//! char-ratio heuristic if the encoder cannot be constructed or a string
//! fails to encode.

use tiktoken_rs::CoreBPE;

use crate::model::Message;

/// Fixed overhead, in tokens, charged per message to account for role and
/// separator tokens the content-only count misses.
const PER_MESSAGE_OVERHEAD: usize = 4;

/// Character-per-token ratio used when the BPE encoder is unavailable.
const FALLBACK_CHARS_PER_TOKEN: f64 = 2.5;

/// Result of estimating one string's token length.
pub struct Estimate {
    pub tokens: usize,
    /// Set when the BPE path failed and the char-ratio fallback was used.
    pub fallback_reason: Option<String>,
}

pub struct TokenEstimator {
    bpe: Option<CoreBPE>,
}

impl TokenEstimator {
    pub fn new() -> Self {
        let bpe = tiktoken_rs::cl100k_base().ok();
        Self { bpe }
    }

    /// Estimate a single string's token count.
    pub fn estimate_text(&self, text: &str) -> Estimate {
        if text.is_empty() {
            return Estimate {
                tokens: 0,
                fallback_reason: None,
            };
        }

        if let Some(bpe) = &self.bpe {
            return Estimate {
                tokens: bpe.encode_with_special_tokens(text).len(),
                fallback_reason: None,
            };
        }

        Estimate {
            tokens: char_ratio_estimate(text),
            fallback_reason: Some("cl100k_base encoder unavailable".to_string()),
        }
    }

    /// Estimate the total token count for a conversation, including the
    /// fixed per-message overhead. Returns the total plus an optional
    /// fallback reason if any message required the heuristic path.
    pub fn estimate_messages(&self, messages: &[Message]) -> Estimate {
        let mut total = 0usize;
        let mut fallback_reason = None;

        for message in messages {
            let text = message.estimator_text();
            let estimate = self.estimate_text(&text);
            total += estimate.tokens + PER_MESSAGE_OVERHEAD;
            if fallback_reason.is_none() {
                fallback_reason = estimate.fallback_reason;
            }
        }

        Estimate {
            tokens: total,
            fallback_reason,
        }
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

fn char_ratio_estimate(text: &str) -> usize {
    let chars = text.chars().count();
    ((chars as f64) / FALLBACK_CHARS_PER_TOKEN).floor() as usize
}
