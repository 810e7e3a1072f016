//! Model backend abstraction.
//!
//! One narrow trait: a prompt goes in, raw text comes out. Everything
//! that interprets the text (block extraction, parsing, validation)
//! lives in `analysis` so backends stay interchangeable, including the
//! scripted ones used in tests.

pub mod ollama;

pub use ollama::OllamaOracle;

use async_trait::async_trait;

use crate::error::OracleError;

/// Tuning for a single generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationOptions {
    /// Context window the server should reserve, in tokens.
    pub context_size: u32,
    /// Cap on generated tokens.
    pub max_output_tokens: u32,
    /// Sampling temperature. `None` keeps the server default.
    pub temperature: Option<f32>,
}

impl GenerationOptions {
    /// First-attempt analysis call.
    pub fn analysis() -> Self {
        GenerationOptions {
            context_size: 32_768,
            max_output_tokens: 4_000,
            temperature: None,
        }
    }

    /// Repair call: same budget, temperature pinned to zero so the
    /// reformat is as deterministic as the backend allows.
    pub fn repair() -> Self {
        GenerationOptions {
            temperature: Some(0.0),
            ..Self::analysis()
        }
    }

    /// Draft generation. Long threads get a bigger window.
    pub fn draft(thread_len: usize) -> Self {
        GenerationOptions {
            context_size: if thread_len >= 2 { 65_536 } else { 32_768 },
            max_output_tokens: 4_000,
            temperature: None,
        }
    }
}

/// A text-generation backend.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Run one prompt to completion and return the response text,
    /// trimmed. An empty response is an error, not an empty string.
    async fn generate(&self, prompt: &str, options: GenerationOptions)
        -> Result<String, OracleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_options_pin_temperature() {
        let opts = GenerationOptions::repair();
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.context_size, GenerationOptions::analysis().context_size);
    }

    #[test]
    fn draft_options_widen_for_threads() {
        assert_eq!(GenerationOptions::draft(1).context_size, 32_768);
        assert_eq!(GenerationOptions::draft(2).context_size, 65_536);
        assert_eq!(GenerationOptions::draft(5).context_size, 65_536);
    }
}
