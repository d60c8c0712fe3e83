//! Utility functions

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest directory/service name derived from a deployment name
pub const MAX_NAME_LEN: usize = 50;

/// Version information for the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Cooldown options for retry backoff.
///
/// The first `fast_retries` failures wait `fast_delay`; after that the wait
/// starts at `base_delay` and grows by `multiplier` per failure up to
/// `max_delay`.
#[derive(Debug, Clone)]
pub struct CooldownOptions {
    pub fast_retries: u32,
    pub fast_delay: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of each wait applied as +/- random jitter
    pub jitter: f64,
}

impl Default for CooldownOptions {
    fn default() -> Self {
        Self {
            fast_retries: 3,
            fast_delay: Duration::from_secs(2),
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(12 * 60 * 60),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// Calculate the nominal (unjittered) wait after `err_streak` consecutive failures.
///
/// `err_streak` counts the failure that just happened, so the first failure is 1.
pub fn calc_exp_backoff(options: &CooldownOptions, err_streak: u32) -> Duration {
    if err_streak <= options.fast_retries {
        return options.fast_delay;
    }
    let exponent = (err_streak - options.fast_retries - 1).min(63) as i32;
    let delay_secs = options.base_delay.as_secs_f64() * options.multiplier.powi(exponent);
    let capped_delay = delay_secs.min(options.max_delay.as_secs_f64());
    Duration::from_secs_f64(capped_delay)
}

/// Spread `delay` uniformly over `[delay * (1 - fraction), delay * (1 + fraction)]`
pub fn jittered(delay: Duration, fraction: f64) -> Duration {
    if fraction <= 0.0 || delay.is_zero() {
        return delay;
    }
    let factor = rand::rng().random_range((1.0 - fraction)..=(1.0 + fraction));
    delay.mul_f64(factor)
}

/// Generate a random UUID v4
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Turn a deployment name into a directory and service name.
///
/// Lower-cases, collapses every run of non-alphanumerics into one hyphen,
/// trims hyphens from both ends and truncates to [`MAX_NAME_LEN`].
pub fn sanitize_name(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    let mut last_was_hyphen = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            sanitized.push(ch.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            sanitized.push('-');
            last_was_hyphen = true;
        }
    }

    let trimmed = sanitized.trim_matches('-');
    let truncated: String = trimmed.chars().take(MAX_NAME_LEN).collect();
    truncated.trim_end_matches('-').to_string()
}
