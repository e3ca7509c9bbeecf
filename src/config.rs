//! Service configuration loaded from environment variables.
//!
//! Every setting has a default so the service can start with zero
//! configuration for local development.

use std::path::PathBuf;
use std::str::FromStr;

/// Matching engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchingConfig {
    /// Shuffle attempts before a run fails with `AssignmentFailed`.
    /// Env: `GIFT_CHAIN_MAX_MATCH_ATTEMPTS`
    /// Default: `10`, never below `1`.
    pub max_attempts: u32,
}

/// Service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Path of the sled database directory.
    /// Env: `GIFT_CHAIN_DB_PATH`
    /// Default: `./gift_chain.db`
    pub db_path: PathBuf,

    /// Smallest roster a chain may be created with.
    /// Env: `GIFT_CHAIN_MIN_PARTICIPANTS`
    /// Default: `2`
    pub min_participants: u32,

    /// Largest roster a chain may be created with.
    /// Env: `GIFT_CHAIN_MAX_PARTICIPANTS`
    /// Default: `100`
    pub max_participants: u32,

    /// Env: `GIFT_CHAIN_DEFAULT_MIN_PARTICIPANTS`
    /// Default: `3`
    pub default_min_participants: u32,

    /// Env: `GIFT_CHAIN_DEFAULT_MAX_PARTICIPANTS`
    /// Default: `50`
    pub default_max_participants: u32,

    pub matching: MatchingConfig,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self { max_attempts: 10 }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./gift_chain.db"),
            min_participants: 2,
            max_participants: 100,
            default_min_participants: 3,
            default_max_participants: 50,
            matching: MatchingConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServiceConfig::from_env`] but reads values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("GIFT_CHAIN_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        parse_into(
            &lookup,
            "GIFT_CHAIN_MAX_MATCH_ATTEMPTS",
            &mut config.matching.max_attempts,
        );
        parse_into(
            &lookup,
            "GIFT_CHAIN_MIN_PARTICIPANTS",
            &mut config.min_participants,
        );
        parse_into(
            &lookup,
            "GIFT_CHAIN_MAX_PARTICIPANTS",
            &mut config.max_participants,
        );
        parse_into(
            &lookup,
            "GIFT_CHAIN_DEFAULT_MIN_PARTICIPANTS",
            &mut config.default_min_participants,
        );
        parse_into(
            &lookup,
            "GIFT_CHAIN_DEFAULT_MAX_PARTICIPANTS",
            &mut config.default_max_participants,
        );

        if config.matching.max_attempts == 0 {
            tracing::warn!("GIFT_CHAIN_MAX_MATCH_ATTEMPTS must be at least 1, using 1");
            config.matching.max_attempts = 1;
        }
        // a derangement needs two people
        if config.min_participants < 2 {
            tracing::warn!(
                value = config.min_participants,
                "GIFT_CHAIN_MIN_PARTICIPANTS below 2, using 2"
            );
            config.min_participants = 2;
        }
        if config.max_participants < config.min_participants {
            tracing::warn!(
                min = config.min_participants,
                max = config.max_participants,
                "GIFT_CHAIN_MAX_PARTICIPANTS below minimum, using minimum"
            );
            config.max_participants = config.min_participants;
        }
        // drafts without explicit bounds must still validate
        let default_min = config
            .default_min_participants
            .clamp(config.min_participants, config.max_participants);
        let default_max = config
            .default_max_participants
            .clamp(default_min, config.max_participants);
        if (default_min, default_max)
            != (
                config.default_min_participants,
                config.default_max_participants,
            )
        {
            tracing::warn!(
                min = default_min,
                max = default_max,
                "default participant bounds outside allowed range, clamping"
            );
            config.default_min_participants = default_min;
            config.default_max_participants = default_max;
        }

        config
    }
}

fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
        }
    }
}
