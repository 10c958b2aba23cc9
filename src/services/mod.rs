//! Contracts for the external generation and synthesis services.
//!
//! Both are called with the epoch of the turn that requested the work so
//! results can be matched back to their turn; neither needs a cancel
//! primitive, since stale results are discarded by the coordinator.

pub mod retry;

use crate::error::Result;
use crate::pipeline::messages::{AudioBuffer, GeneratedText};
use async_trait::async_trait;

/// Text generation (the language model).
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Produce a reply to `context`. The result must echo `epoch`.
    async fn generate(&self, context: &str, epoch: u64) -> Result<GeneratedText>;
}

/// Speech synthesis (text to audio).
#[async_trait]
pub trait SynthesisService: Send + Sync {
    /// Render `text` to audio.
    async fn synthesize(&self, text: &str, epoch: u64) -> Result<AudioBuffer>;
}
