use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_word_cadence_ms() -> u64 {
    250
}

fn default_display_window() -> usize {
    18
}

fn default_fallback_arm_ms() -> u64 {
    200
}

fn default_clear_pause_ms() -> u64 {
    2000
}

fn default_user_settle_ms() -> u64 {
    300
}

fn default_activity_threshold() -> f32 {
    12.0
}

fn default_bot_silence_ms() -> u64 {
    3500
}

fn default_forced_stop_clear_ms() -> u64 {
    1500
}

fn default_janitor_interval_ms() -> u64 {
    1000
}

fn default_user_stale_ms() -> u64 {
    3000
}

fn default_transcript_stale_ms() -> u64 {
    8000
}

/// Tuning for the turn-state engine and transcript scheduler.
///
/// The thresholds were tuned against one deployment's audio; treat them as
/// starting points rather than constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Spacing between word reveals, measured from the start of bot speech.
    #[serde(default = "default_word_cadence_ms")]
    pub word_cadence_ms: u64,
    /// Number of trailing words kept in the display window.
    #[serde(default = "default_display_window")]
    pub display_window: usize,
    /// How long to wait for primary text before displaying fragments.
    #[serde(default = "default_fallback_arm_ms")]
    pub fallback_arm_ms: u64,
    /// Pause after the last word before the transcript is cleared.
    #[serde(default = "default_clear_pause_ms")]
    pub clear_pause_ms: u64,
    /// Delay that absorbs voice-activity flicker after a user stop.
    #[serde(default = "default_user_settle_ms")]
    pub user_settle_ms: u64,
    /// Volume (0..=255) above which the remote audio counts as speech.
    #[serde(default = "default_activity_threshold")]
    pub activity_threshold: f32,
    /// Silence after which a bot turn is considered over.
    #[serde(default = "default_bot_silence_ms")]
    pub bot_silence_ms: u64,
    /// Transcript clear delay after an audio-detected stop.
    #[serde(default = "default_forced_stop_clear_ms")]
    pub forced_stop_clear_ms: u64,
    /// Period of the stale-state janitor.
    #[serde(default = "default_janitor_interval_ms")]
    pub janitor_interval_ms: u64,
    #[serde(default = "default_user_stale_ms")]
    pub user_stale_ms: u64,
    #[serde(default = "default_transcript_stale_ms")]
    pub transcript_stale_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            word_cadence_ms: default_word_cadence_ms(),
            display_window: default_display_window(),
            fallback_arm_ms: default_fallback_arm_ms(),
            clear_pause_ms: default_clear_pause_ms(),
            user_settle_ms: default_user_settle_ms(),
            activity_threshold: default_activity_threshold(),
            bot_silence_ms: default_bot_silence_ms(),
            forced_stop_clear_ms: default_forced_stop_clear_ms(),
            janitor_interval_ms: default_janitor_interval_ms(),
            user_stale_ms: default_user_stale_ms(),
            transcript_stale_ms: default_transcript_stale_ms(),
        }
    }
}

impl EngineConfig {
    pub fn word_cadence(&self) -> Duration {
        Duration::from_millis(self.word_cadence_ms)
    }

    pub fn fallback_arm(&self) -> Duration {
        Duration::from_millis(self.fallback_arm_ms)
    }

    pub fn clear_pause(&self) -> Duration {
        Duration::from_millis(self.clear_pause_ms)
    }

    pub fn user_settle(&self) -> Duration {
        Duration::from_millis(self.user_settle_ms)
    }

    pub fn bot_silence(&self) -> Duration {
        Duration::from_millis(self.bot_silence_ms)
    }

    pub fn forced_stop_clear(&self) -> Duration {
        Duration::from_millis(self.forced_stop_clear_ms)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_millis(self.janitor_interval_ms.max(1))
    }

    pub fn user_stale(&self) -> Duration {
        Duration::from_millis(self.user_stale_ms)
    }

    pub fn transcript_stale(&self) -> Duration {
        Duration::from_millis(self.transcript_stale_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_table_keeps_defaults() {
        let config: EngineConfig = toml::from_str("word_cadence_ms = 200\n").unwrap();
        assert_eq!(config.word_cadence_ms, 200);
        assert_eq!(config.display_window, 18);
        assert_eq!(config.activity_threshold, 12.0);
        assert_eq!(config.transcript_stale(), Duration::from_secs(8));
    }
}
