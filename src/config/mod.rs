//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,

    /// First score to reach this wins a match
    pub winning_score: u32,
    /// Simulation tick interval in milliseconds (~60 Hz default)
    pub tick_ms: u64,
    /// AI decision cadence in milliseconds
    pub ai_think_ms: u64,
    /// Pause between the ball leaving the field and the re-serve
    pub settle_ms: u64,
    /// Speed added to both ball velocity components per paddle hit;
    /// 0 disables rally acceleration
    pub rally_speedup: f32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            winning_score: parse_var("WINNING_SCORE", 5)?,
            tick_ms: parse_var("TICK_MS", 16)?,
            ai_think_ms: parse_var("AI_THINK_MS", 1000)?,
            settle_ms: parse_var("SETTLE_MS", 1000)?,
            rally_speedup: parse_var("RALLY_SPEEDUP", 0.0)?,
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
