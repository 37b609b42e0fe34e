//! Effective configuration for one probe run.
//!
//! `ProbeOptions` is the Rust-native mirror of the CLI surface; building it
//! from `clap` flags is `procwatch-cli`'s job. Defaults here follow the
//! `default_x() -> T` + `#[serde(default = "default_x")]` idiom `RuntimeConfig`
//! uses for its TOML-backed config, even though this struct is populated
//! from flags rather than a file — that shape is kept regardless of the
//! input source so it also round-trips through the start record's
//! effective-configuration payload.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOptions {
    /// Process identifier or name/command substring (required at the CLI).
    pub target: String,
    /// Maximum monitoring wall time; `None` = unbounded.
    #[serde(default)]
    pub duration: Option<std::time::Duration>,
    /// Path for structured-log output, if any.
    #[serde(default)]
    pub output: Option<std::path::PathBuf>,
    /// Suppress the terminal view.
    #[serde(default)]
    pub no_display: bool,
    /// Regular-expression allow-list on event bytes prior to emission.
    #[serde(default)]
    pub filter: Vec<String>,
    /// Per-stream ring capacity, in bytes (already converted from KB).
    #[serde(default = "default_buffer_size_bytes")]
    pub buffer_size_bytes: usize,
    /// DirectFD poll cadence.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: std::time::Duration,
    /// Emit per-event activity records in addition to vulnerabilities.
    #[serde(default)]
    pub show_activity: bool,
    /// Opt in to trace-source fallback.
    #[serde(default)]
    pub enable_strace: bool,
}

fn default_buffer_size_bytes() -> usize {
    64 * 1024
}

fn default_poll_interval() -> std::time::Duration {
    std::time::Duration::from_millis(20)
}

impl ProbeOptions {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            duration: None,
            output: None,
            no_display: false,
            filter: Vec::new(),
            buffer_size_bytes: default_buffer_size_bytes(),
            poll_interval: default_poll_interval(),
            show_activity: false,
            enable_strace: false,
        }
    }

    /// Rounds `buffer_size_bytes` up to the next power of two, since `Ring`
    /// requires a power-of-two capacity for mask-based indexing.
    pub fn ring_capacity(&self) -> usize {
        self.buffer_size_bytes.next_power_of_two().max(4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_capacity_rounds_up() {
        let mut opts = ProbeOptions::new("1234");
        opts.buffer_size_bytes = 5000;
        assert_eq!(opts.ring_capacity(), 8192);
    }

    #[test]
    fn ring_capacity_preserves_power_of_two() {
        let mut opts = ProbeOptions::new("1234");
        opts.buffer_size_bytes = 4096;
        assert_eq!(opts.ring_capacity(), 4096);
    }

    #[test]
    fn defaults_are_sane() {
        let opts = ProbeOptions::new("sshd");
        assert_eq!(opts.buffer_size_bytes, 64 * 1024);
        assert_eq!(opts.poll_interval, std::time::Duration::from_millis(20));
        assert!(!opts.enable_strace);
    }
}
