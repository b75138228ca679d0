use std::{env, fmt, fs, path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::DEFAULT_REFRESH_INTERVAL_SECS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    ReadFailed(#[source] std::io::Error),
    #[error("failed to write config: {0}")]
    WriteFailed(#[source] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseFailed(String),
    #[error("invalid {field} URL: {reason}")]
    InvalidUrl { field: &'static str, reason: String },
    #[error("no config directory available")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustListConfig {
    /// Detached signature resource
    pub signature_url: String,
    /// Full trust list resource
    pub trust_list_url: String,
    pub refresh_interval_secs: u64,
    pub request_timeout_secs: u64,
    /// Holds the encrypted trust list, refresh state and at-rest key
    pub storage_dir: path::PathBuf,
    /// Base64 certificate replacing the embedded trust anchor
    pub trust_anchor: Option<String>,
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/healthcert/trustlist.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("healthcert/trustlist.toml"))
}

/// $XDG_DATA_HOME/healthcert, $HOME/.local/share/healthcert, or ./healthcert
fn default_storage_dir() -> path::PathBuf {
    if let Ok(data_home) = env::var("XDG_DATA_HOME") {
        path::PathBuf::from(data_home).join("healthcert")
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".local/share/healthcert")
    } else {
        path::PathBuf::from("healthcert")
    }
}

fn validate_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl { field, reason: e.to_string() })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidUrl { field, reason: format!("unsupported scheme {other}") }),
    }
}

impl Default for TrustListConfig {
    fn default() -> Self {
        Self {
            signature_url: "https://trust.healthcert.example/trustlist.sig".into(),
            trust_list_url: "https://trust.healthcert.example/trustlist".into(),
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            request_timeout_secs: 10,
            storage_dir: default_storage_dir(),
            trust_anchor: None,
        }
    }
}

impl fmt::Display for TrustListConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_1 = write_indented(1);

        writeln!(f, "Trust List Configuration:")?;
        write_1(f, "Signature URL", &self.signature_url)?;
        write_1(f, "Trust List URL", &self.trust_list_url)?;
        write_1(f, "Refresh Interval (s)", &self.refresh_interval_secs)?;
        write_1(f, "Request Timeout (s)", &self.request_timeout_secs)?;
        write_1(f, "Storage Directory", &self.storage_dir.display())?;
        write_1(
            f,
            "Trust Anchor",
            &if self.trust_anchor.is_some() { "configured" } else { "embedded" },
        )?;

        Ok(())
    }
}

impl TrustListConfig {
    /// Generate config from file
    ///
    /// Creates a default config in ~/.config/healthcert/trustlist.toml
    ///  or the specified path if one does not exist
    ///
    /// ```no_run
    /// use healthcert_trust::TrustListConfig;
    ///
    /// let cfg = TrustListConfig::from_config(None::<&std::path::Path>)?;
    /// println!("{}", cfg);
    /// # Ok::<(), healthcert_trust::ConfigError>(())
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(ConfigError::ReadFailed)?;
            toml::from_str(raw_string.as_str()).map_err(|e| ConfigError::ParseFailed(e.to_string()))?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        fs::write(path, config_str).map_err(ConfigError::WriteFailed)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("signature", &self.signature_url)?;
        validate_url("trust list", &self.trust_list_url)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Set both resource URLs
    pub fn with_urls(mut self, signature_url: impl Into<String>, trust_list_url: impl Into<String>) -> Self {
        self.signature_url = signature_url.into();
        self.trust_list_url = trust_list_url.into();
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval_secs = interval.as_secs();
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<path::PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    pub fn with_trust_anchor(mut self, certificate_base64: impl Into<String>) -> Self {
        self.trust_anchor = Some(certificate_base64.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trustlist");

        let config = TrustListConfig::from_config(Some(&path)).unwrap();
        assert_eq!(config.refresh_interval_secs, DEFAULT_REFRESH_INTERVAL_SECS);
        assert!(dir.path().join("trustlist.toml").exists());

        let reread = TrustListConfig::from_config(Some(&path)).unwrap();
        assert_eq!(reread, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trustlist.toml");
        fs::write(
            &path,
            "signature_url = \"https://trust.example.org/sig\"\nrefresh_interval_secs = 60\n",
        )
        .unwrap();

        let config = TrustListConfig::from_config(Some(&path)).unwrap();
        assert_eq!(config.signature_url, "https://trust.example.org/sig");
        assert_eq!(config.refresh_interval(), Duration::from_secs(60));
        assert_eq!(config.request_timeout_secs, 10);
    }

    #[test]
    fn test_invalid_url_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trustlist.toml");
        fs::write(&path, "trust_list_url = \"ftp://trust.example.org/list\"\n").unwrap();

        let result = TrustListConfig::from_config(Some(&path));
        assert!(matches!(result, Err(ConfigError::InvalidUrl { field: "trust list", .. })));
    }

    #[test]
    fn test_unparseable_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trustlist.toml");
        fs::write(&path, "refresh_interval_secs = \"soon\"\n").unwrap();

        assert!(matches!(TrustListConfig::from_config(Some(&path)), Err(ConfigError::ParseFailed(_))));
    }

    #[test]
    fn test_display_lists_sources() {
        let rendered = TrustListConfig::default().to_string();
        assert!(rendered.contains("Signature URL"));
        assert!(rendered.contains("embedded"));
    }
}
