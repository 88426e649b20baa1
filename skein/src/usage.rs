//! Token usage tracking for LLM operations.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Token usage statistics from an LLM call.
///
/// Aligns with the usage object of chat-completion style APIs; the
/// `prompt_tokens` / `completion_tokens` aliases accept provider payloads
/// verbatim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the input/prompt.
    #[serde(default, alias = "prompt_tokens")]
    pub input_tokens: u32,

    /// Number of tokens in the output/completion.
    #[serde(default, alias = "completion_tokens")]
    pub output_tokens: u32,

    /// Total tokens used (input + output).
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    /// Create a new usage record.
    #[must_use]
    pub const fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Create an empty usage record.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
        }
    }

    /// Returns `true` if no tokens were recorded.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.total_tokens == 0
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn new_computes_total() {
        let usage = Usage::new(100, 50);
        assert_eq!(usage.total_tokens, 150);
    }

    #[test]
    fn zero_is_zero() {
        assert!(Usage::zero().is_zero());
        assert!(!Usage::new(1, 0).is_zero());
    }

    #[test]
    fn add_accumulates() {
        let mut total = Usage::zero();
        total += Usage::new(10, 5);
        total += Usage::new(20, 15);
        assert_eq!(total.input_tokens, 30);
        assert_eq!(total.output_tokens, 20);
        assert_eq!(total.total_tokens, 50);
    }

    #[test]
    fn serde_accepts_openai_aliases() {
        let usage: Usage =
            serde_json::from_str(r#"{"prompt_tokens":7,"completion_tokens":3,"total_tokens":10}"#)
                .unwrap();
        assert_eq!(usage.input_tokens, 7);
        assert_eq!(usage.output_tokens, 3);
    }
}
