//! Configuration types for the turn-detection cascade.

use crate::error::{CascadeError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for the cascade coordinator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    /// Stage deadlines relative to the last speech activity.
    pub cascade: CascadeTimingConfig,
    /// Barge-in (interrupt) behavior while the assistant is speaking.
    pub barge_in: BargeInConfig,
    /// Generation/synthesis call budgets and fallback behavior.
    pub services: ServiceConfig,
    /// Speaker output settings (used by the cpal backend).
    pub playback: PlaybackConfig,
}

/// Offsets of the three speculative stages from the last activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeTimingConfig {
    /// Quiet period before text generation starts (ms).
    pub stage1_ms: u64,
    /// Quiet period before speech synthesis starts (ms).
    pub stage2_ms: u64,
    /// Quiet period before playback starts (ms).
    pub stage3_ms: u64,
    /// Extra quiet time for short utterances.
    pub adaptive: AdaptiveDelayConfig,
    /// Extra silence required before answering very short or brief speech.
    pub confirmation: SilenceConfirmationConfig,
}

/// Upper bound for any configured stage offset or extra delay (one hour).
pub const MAX_STAGE_OFFSET_MS: u64 = 3_600_000;

impl Default for CascadeTimingConfig {
    fn default() -> Self {
        Self {
            stage1_ms: 500,
            stage2_ms: 1500,
            stage3_ms: 2000,
            adaptive: AdaptiveDelayConfig::default(),
            confirmation: SilenceConfirmationConfig::default(),
        }
    }
}

/// Three stage offsets, always strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeOffsets {
    pub stage1: Duration,
    pub stage2: Duration,
    pub stage3: Duration,
}

impl CascadeTimingConfig {
    /// Stage offsets for an utterance of `word_count` words that has been
    /// going on for `spoken`.
    ///
    /// Extras are added to every stage, so ordering is preserved.
    pub fn offsets_for(&self, word_count: usize, spoken: Duration) -> CascadeOffsets {
        let extra = self
            .adaptive
            .extra_ms(word_count)
            .saturating_add(self.confirmation.extra_ms(word_count, spoken));
        CascadeOffsets {
            stage1: Duration::from_millis(self.stage1_ms.saturating_add(extra)),
            stage2: Duration::from_millis(self.stage2_ms.saturating_add(extra)),
            stage3: Duration::from_millis(self.stage3_ms.saturating_add(extra)),
        }
    }

    /// Largest offset any utterance can be scheduled with.
    fn max_offset_ms(&self) -> u64 {
        let adaptive = if self.adaptive.enabled {
            self.adaptive.short_extra_ms.max(self.adaptive.medium_extra_ms)
        } else {
            0
        };
        let confirmation = if self.confirmation.enabled {
            self.confirmation.silence_confirmation_ms
        } else {
            0
        };
        self.stage3_ms
            .saturating_add(adaptive)
            .saturating_add(confirmation)
    }
}

/// Longer quiet windows for short utterances.
///
/// Very short answers ("yes", "ok sure") tend to be followed by a
/// continuation more often than long sentences, so speculation waits a
/// little longer before committing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveDelayConfig {
    /// Whether word-count based extra delay is applied.
    pub enabled: bool,
    /// Utterances with at most this many words are "short".
    pub short_utterance_words: usize,
    /// Extra delay for short utterances (ms).
    pub short_extra_ms: u64,
    /// Utterances with at most this many words are "medium".
    pub medium_utterance_words: usize,
    /// Extra delay for medium utterances (ms).
    pub medium_extra_ms: u64,
}

impl Default for AdaptiveDelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            short_utterance_words: 3,
            short_extra_ms: 600,
            medium_utterance_words: 6,
            medium_extra_ms: 300,
        }
    }
}

impl AdaptiveDelayConfig {
    /// Extra delay in ms for an utterance of `word_count` words.
    pub fn extra_ms(&self, word_count: usize) -> u64 {
        if !self.enabled {
            return 0;
        }
        if word_count <= self.short_utterance_words {
            self.short_extra_ms
        } else if word_count <= self.medium_utterance_words {
            self.medium_extra_ms
        } else {
            0
        }
    }
}

/// Silence confirmation for short utterances.
///
/// A one-word answer or a burst of speech shorter than
/// `confirmation_max_utterance_ms` is often the start of a longer thought.
/// When enabled, such utterances need `silence_confirmation_ms` of extra
/// quiet on top of the base offsets (and any adaptive delay) before
/// generation starts. Disabled by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SilenceConfirmationConfig {
    pub enabled: bool,
    /// Extra silence required (ms).
    pub silence_confirmation_ms: u64,
    /// Utterances with fewer words than this need confirmation.
    pub confirmation_max_words: usize,
    /// Utterances spoken for less than this need confirmation (ms).
    pub confirmation_max_utterance_ms: u64,
}

impl Default for SilenceConfirmationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            silence_confirmation_ms: 800,
            confirmation_max_words: 6,
            confirmation_max_utterance_ms: 1_800,
        }
    }
}

impl SilenceConfirmationConfig {
    /// Extra delay in ms for an utterance of `word_count` words spoken over `spoken`.
    pub fn extra_ms(&self, word_count: usize, spoken: Duration) -> u64 {
        if !self.enabled {
            return 0;
        }
        let brief = spoken < Duration::from_millis(self.confirmation_max_utterance_ms);
        if word_count < self.confirmation_max_words || brief {
            self.silence_confirmation_ms
        } else {
            0
        }
    }
}

/// Barge-in configuration (user interrupts the assistant by speaking).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BargeInConfig {
    /// Whether speech-triggered barge-in is enabled.
    ///
    /// Explicit interrupt commands are always honored.
    pub enabled: bool,
    /// Transcription confidence that must be exceeded to interrupt playback.
    pub confidence_threshold: f32,
    /// Ignore speech-triggered barge-in for a short window after playback
    /// starts (ms). Guards against speaker leakage at playback onset.
    pub assistant_start_holdoff_ms: u64,
    /// Hard budget for silencing the speaker (ms).
    pub stop_budget_ms: u64,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: 0.7,
            assistant_start_holdoff_ms: 0,
            stop_budget_ms: 100,
        }
    }
}

/// External service budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Per-attempt timeout for the generation service (ms).
    pub generation_timeout_ms: u64,
    /// Per-attempt timeout for the synthesis service (ms).
    pub synthesis_timeout_ms: u64,
    /// Retries after the first failed attempt.
    pub retries: u32,
    /// Spoken when generation or synthesis gives up.
    pub fallback_text: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            generation_timeout_ms: 10_000,
            synthesis_timeout_ms: 5_000,
            retries: 1,
            fallback_text: "Sorry, could you repeat that?".to_owned(),
        }
    }
}

/// Speaker output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Output device name (None = system default).
    pub output_device: Option<String>,
    /// Output sample rate in Hz.
    pub output_sample_rate: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            output_device: None,
            output_sample_rate: 24_000,
        }
    }
}

impl CascadeConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| CascadeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CascadeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/fae/cascade.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("fae").join("cascade.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("fae")
                .join("cascade.toml")
        } else {
            PathBuf::from("/tmp/fae-config/cascade.toml")
        }
    }

    /// Check cross-field constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::Config`] describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        let c = &self.cascade;
        if c.stage1_ms == 0 {
            return Err(CascadeError::Config("cascade.stage1_ms must be > 0".into()));
        }
        if !(c.stage1_ms < c.stage2_ms && c.stage2_ms < c.stage3_ms) {
            return Err(CascadeError::Config(format!(
                "cascade offsets must be strictly increasing (got {} / {} / {})",
                c.stage1_ms, c.stage2_ms, c.stage3_ms
            )));
        }
        if c.max_offset_ms() > MAX_STAGE_OFFSET_MS {
            return Err(CascadeError::Config(format!(
                "cascade offsets plus extra delays must not exceed {MAX_STAGE_OFFSET_MS} ms (got {})",
                c.max_offset_ms()
            )));
        }
        let threshold = self.barge_in.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(CascadeError::Config(format!(
                "barge_in.confidence_threshold must be within [0, 1] (got {threshold})"
            )));
        }
        if self.barge_in.stop_budget_ms == 0 {
            return Err(CascadeError::Config(
                "barge_in.stop_budget_ms must be > 0".into(),
            ));
        }
        if self.services.generation_timeout_ms == 0 || self.services.synthesis_timeout_ms == 0 {
            return Err(CascadeError::Config(
                "service timeouts must be > 0".into(),
            ));
        }
        Ok(())
    }
}
