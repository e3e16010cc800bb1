//! Environment configuration.
//!
//! All process-wide settings are read once in `main` into an explicit
//! `Config` value and threaded through the program; nothing below this
//! module reads the environment for configuration.
//!
//! Variables:
//!   DOCKER_BUILDER_API_URL  service root (default https://api.agintai.com)
//!   AGINT_APIKEY            credential, required
//!   DEBUG=1                 debug-level logging
//!   OPENAPI_SPEC_PATH       local schema file, bypasses network discovery
//!   AGINT_BACKGROUND_SYNC=1 detach the post-command snapshot pull

use anyhow::{Result, bail};
use std::path::PathBuf;

pub const DEFAULT_API_URL: &str = "https://api.agintai.com";

/// Resolved process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Remote service root, no trailing slash.
    pub api_url: String,
    /// API credential sent with every request body.
    pub api_key: String,
    /// Verbose structured logging requested via env.
    pub debug: bool,
    /// Local OpenAPI document overriding network discovery.
    pub spec_path: Option<PathBuf>,
    /// Detach the post-command snapshot pull instead of awaiting it.
    pub background_sync: bool,
}

impl Config {
    /// Read configuration from the environment. The credential is required;
    /// its absence is fatal before any network call is made.
    pub fn from_env() -> Result<Self> {
        let api_url = std::env::var("DOCKER_BUILDER_API_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = api_url.trim_end_matches('/').to_string();

        let Some(api_key) = std::env::var("AGINT_APIKEY")
            .ok()
            .filter(|s| !s.trim().is_empty())
        else {
            bail!("AGINT_APIKEY environment variable not set");
        };

        Ok(Self {
            api_url,
            api_key,
            debug: env_flag("DEBUG"),
            spec_path: std::env::var_os("OPENAPI_SPEC_PATH").map(PathBuf::from),
            background_sync: env_flag("AGINT_BACKGROUND_SYNC"),
        })
    }
}

/// `VAR=1` style boolean flag.
pub fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "1").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var mutation is process-global, so the cases run in one test.
    #[test]
    fn from_env_roundtrip() {
        unsafe {
            std::env::remove_var("AGINT_APIKEY");
            std::env::remove_var("DOCKER_BUILDER_API_URL");
        }
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("AGINT_APIKEY"));

        unsafe {
            std::env::set_var("AGINT_APIKEY", "k-123");
            std::env::set_var("DOCKER_BUILDER_API_URL", "https://svc.example/");
        }
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.api_key, "k-123");
        assert_eq!(cfg.api_url, "https://svc.example", "trailing slash trimmed");

        unsafe {
            std::env::remove_var("AGINT_APIKEY");
            std::env::remove_var("DOCKER_BUILDER_API_URL");
        }
    }
}
