//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 3000).
    pub port: u16,

    /// Emit developer diagnostics such as missing type declarations
    /// (default: false).
    pub debug_developer: bool,

    /// Root of the managed file store (default: ./filestore).
    pub filestore_dir: PathBuf,

    /// Directory for uploads in flight and temporary copies
    /// (default: system temp dir + /formwork).
    pub temp_dir: PathBuf,

    /// Largest accepted request body in bytes (default: 10 MiB).
    pub max_upload_bytes: usize,

    /// Cookie SameSite policy: "strict", "lax", or "none" (default: "strict").
    pub cookie_same_site: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("PORT must be a valid u16")?;

        let debug_developer = env::var("DEBUG_DEVELOPER")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);

        let filestore_dir = env::var("FILESTORE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./filestore"));

        let temp_dir = env::var("TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir().join("formwork"));

        let max_upload_bytes = env::var("MAX_UPLOAD_BYTES")
            .unwrap_or_else(|_| (10 * 1024 * 1024).to_string())
            .parse()
            .context("MAX_UPLOAD_BYTES must be a valid byte count")?;

        let cookie_same_site = env::var("COOKIE_SAME_SITE")
            .unwrap_or_else(|_| "strict".to_string())
            .to_lowercase();

        Ok(Self {
            port,
            debug_developer,
            filestore_dir,
            temp_dir,
            max_upload_bytes,
            cookie_same_site,
        })
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag(" TRUE "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
    }
}
