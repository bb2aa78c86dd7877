//! Runtime configuration, read once from the environment at start-up.
//!
//! Unset variables fall back to defaults; a variable that is set but cannot
//! be parsed is a start-up error.

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::classifier::{DEFAULT_CLASSIFIER_URL, FallbackPolicy};

/// Default port if not specified via environment variable.
const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
const DEFAULT_DB_PATH: &str = "sqlite:herdwatch.db?mode=rwc";

/// Default upper bound on a single classifier request.
const DEFAULT_CLASSIFIER_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub classifier_url: String,
    pub classifier_timeout: Duration,
    pub fallback: FallbackPolicy,
    pub prediction_cache_capacity: usize,
}

impl Config {
    /// Load configuration from `HERDWATCH_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            port: parse_or(&lookup, "HERDWATCH_PORT", DEFAULT_PORT)?,
            database_url: lookup("HERDWATCH_DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            classifier_url: lookup("HERDWATCH_CLASSIFIER_URL")
                .unwrap_or_else(|| DEFAULT_CLASSIFIER_URL.to_string()),
            classifier_timeout: Duration::from_secs(parse_or(
                &lookup,
                "HERDWATCH_CLASSIFIER_TIMEOUT_SECS",
                DEFAULT_CLASSIFIER_TIMEOUT_SECS,
            )?),
            fallback: parse_or(
                &lookup,
                "HERDWATCH_CLASSIFIER_FALLBACK",
                FallbackPolicy::default(),
            )?,
            prediction_cache_capacity: parse_or(
                &lookup,
                "HERDWATCH_PREDICTION_CACHE_CAPACITY",
                DEFAULT_CACHE_CAPACITY,
            )?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("invalid value for {key}: '{raw}'")),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}
