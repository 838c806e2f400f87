// src/config.rs

use std::env;
use std::time::Duration;

use dotenvy::dotenv;

/// Violations after which an attempt is force-submitted.
pub const DEFAULT_VIOLATION_THRESHOLD: i64 = 3;

/// Quiet period before a staged answer is written.
pub const DEFAULT_AUTOSAVE_DEBOUNCE_MS: u64 = 3000;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub bind_addr: String,
    pub violation_threshold: i64,
    pub autosave_debounce_ms: u64,
}

/// Tunables handed to the attempt engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub violation_threshold: i64,
    pub autosave_debounce: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            violation_threshold: DEFAULT_VIOLATION_THRESHOLD,
            autosave_debounce: Duration::from_millis(DEFAULT_AUTOSAVE_DEBOUNCE_MS),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        let jwt_expiration = parse_or("JWT_EXPIRATION", 86_400);

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let violation_threshold = parse_or("VIOLATION_THRESHOLD", DEFAULT_VIOLATION_THRESHOLD);
        let autosave_debounce_ms = parse_or("AUTOSAVE_DEBOUNCE_MS", DEFAULT_AUTOSAVE_DEBOUNCE_MS);

        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
            bind_addr,
            violation_threshold,
            autosave_debounce_ms,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            violation_threshold: self.violation_threshold.max(1),
            autosave_debounce: Duration::from_millis(self.autosave_debounce_ms),
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring unparsable {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}
