use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TxError};
use crate::parser::{ParseOptions, DELIMITER_CANDIDATES};
use crate::scoring::DEFAULT_ENDPOINT;

/// Overrides the configured endpoint.
pub const ENDPOINT_ENV: &str = "TXLENS_API_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Forced delimiter; auto-detected when unset.
    #[serde(default)]
    pub delimiter: Option<char>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Cap on concurrent scoring requests; unbounded when unset.
    #[serde(default)]
    pub max_in_flight: Option<usize>,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            delimiter: None,
            timeout_secs: None,
            max_in_flight: None,
        }
    }
}

impl Settings {
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            delimiter: self.delimiter.map(|c| c as u8),
            ..ParseOptions::default()
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Endpoint to use: `flag`, then the environment, then the settings file.
    pub fn resolve_endpoint(&self, flag: Option<&str>) -> String {
        if let Some(endpoint) = flag {
            return endpoint.to_string();
        }
        match std::env::var(ENDPOINT_ENV) {
            Ok(endpoint) if !endpoint.trim().is_empty() => endpoint,
            _ => self.endpoint.clone(),
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("txlens")
}

pub fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

pub fn load_settings() -> Settings {
    load_settings_from(&settings_path())
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    save_settings_to(settings, &settings_path())
}

/// Unreadable or invalid files fall back to defaults.
fn load_settings_from(path: &Path) -> Settings {
    if path.exists() {
        let content = std::fs::read_to_string(path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        Settings::default()
    }
}

fn save_settings_to(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| TxError::Settings(e.to_string()))?;
    std::fs::write(path, format!("{json}\n"))?;
    Ok(())
}

/// Accepts `auto`, a literal delimiter, or the names `tab`, `comma`,
/// `semicolon` and `pipe`.
pub fn parse_delimiter(raw: &str) -> Result<Option<char>> {
    let c = match raw {
        "auto" => return Ok(None),
        "tab" | "\\t" => '\t',
        "comma" => ',',
        "semicolon" => ';',
        "pipe" => '|',
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => return Err(TxError::Settings(format!("Invalid delimiter: {other}"))),
            }
        }
    };
    if !c.is_ascii() || !DELIMITER_CANDIDATES.contains(&(c as u8)) {
        return Err(TxError::Settings(format!(
            "Unsupported delimiter {c:?} (use , ; | or tab)"
        )));
    }
    Ok(Some(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".config").join("txlens").join("settings.json");
        let settings = Settings {
            endpoint: "http://scoring:8080".to_string(),
            delimiter: Some(';'),
            timeout_secs: Some(10),
            max_in_flight: Some(4),
        };
        save_settings_to(&settings, &path).unwrap();
        assert!(path.exists());
        assert_eq!(load_settings_from(&path), settings);
    }

    #[test]
    fn test_missing_or_corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        assert_eq!(load_settings_from(&path), Settings::default());
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_settings_from(&path), Settings::default());
    }

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(s.delimiter, None);
        assert_eq!(s.timeout(), None);
        assert_eq!(s.max_in_flight, None);
        assert_eq!(s.parse_options(), ParseOptions::default());
    }

    #[test]
    fn test_load_merges_with_defaults() {
        let json = r#"{"delimiter": "\t"}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(s.parse_options().delimiter, Some(b'\t'));
    }

    #[test]
    fn test_flag_beats_configured_endpoint() {
        let s = Settings::default();
        assert_eq!(s.resolve_endpoint(Some("http://x:1")), "http://x:1");
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter("auto").unwrap(), None);
        assert_eq!(parse_delimiter("tab").unwrap(), Some('\t'));
        assert_eq!(parse_delimiter(";").unwrap(), Some(';'));
        assert_eq!(parse_delimiter("pipe").unwrap(), Some('|'));
        assert!(parse_delimiter("::").is_err());
        assert!(parse_delimiter("x").is_err());
        assert!(parse_delimiter("\u{0100}").is_err());
    }
}
