//! Shared configuration for corelink tools.
//!
//! TOML profiles, credential resolution (env + plaintext), and translation
//! to `corelink_core::SessionConfig`. The core itself never reads files —
//! the CLI loads a profile here and hands the resolved config in.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use corelink_core::{CoreEndpoint, Credentials, DEFAULT_PORT, SessionConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Named core-pair profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self { default_profile: Some("default".into()), profiles: HashMap::new() }
    }
}

impl Config {
    /// The profile to use: an explicit request, else the configured
    /// default, else "default".
    pub fn active_profile_name(&self, requested: Option<&str>) -> String {
        requested
            .map(ToOwned::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }
}

/// A named profile describing one core or redundant pair.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Primary core as `host` or `host:port`.
    pub primary: String,

    /// Backup core of a redundant pair, same format.
    pub secondary: Option<String>,

    /// Username, when the design has access control enabled.
    pub username: Option<String>,

    /// Password in plaintext (prefer `password_env`).
    pub password: Option<String>,

    /// Environment variable holding the password.
    pub password_env: Option<String>,

    /// Change-group poll interval in milliseconds.
    pub poll_interval_ms: Option<u64>,

    /// Per-request timeout in seconds.
    pub timeout: Option<u64>,

    /// Control names mirrored into the default change group.
    #[serde(default)]
    pub controls: Vec<String>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "corelink", "corelink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("corelink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full [`Config`] from file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load a [`Config`] from an explicit path + environment.
pub fn load_config_from(path: &std::path::Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("CORELINK_").split("_"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(&path, toml_str)?;
    Ok(())
}

// ── Profile resolution ──────────────────────────────────────────────

/// Parse `host` or `host:port` into a [`CoreEndpoint`].
pub fn parse_endpoint(spec: &str, field: &str) -> Result<CoreEndpoint, ConfigError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(ConfigError::Validation { field: field.into(), reason: "empty host".into() });
    }
    match spec.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port.parse().map_err(|_| ConfigError::Validation {
                field: field.into(),
                reason: format!("invalid port in '{spec}'"),
            })?;
            Ok(CoreEndpoint::new(host, port))
        }
        None => Ok(CoreEndpoint::new(spec, DEFAULT_PORT)),
    }
}

/// Resolve logon credentials: env var first, plaintext second, none if
/// no username is configured.
pub fn resolve_credentials(
    profile: &Profile,
    profile_name: &str,
) -> Result<Option<Credentials>, ConfigError> {
    let Some(username) = profile.username.clone() else {
        return Ok(None);
    };

    if let Some(ref env_name) = profile.password_env {
        if let Ok(password) = std::env::var(env_name) {
            return Ok(Some(Credentials { username, password: SecretString::from(password) }));
        }
    }

    if let Some(ref password) = profile.password {
        return Ok(Some(Credentials {
            username,
            password: SecretString::from(password.clone()),
        }));
    }

    Err(ConfigError::NoCredentials { profile: profile_name.into() })
}

/// Build a [`SessionConfig`] from a profile.
pub fn profile_to_session_config(
    profile: &Profile,
    profile_name: &str,
) -> Result<SessionConfig, ConfigError> {
    let primary = parse_endpoint(&profile.primary, "primary")?;
    let secondary = profile
        .secondary
        .as_deref()
        .map(|spec| parse_endpoint(spec, "secondary"))
        .transpose()?;
    let credentials = resolve_credentials(profile, profile_name)?;

    let defaults = SessionConfig::default();
    Ok(SessionConfig {
        primary,
        secondary,
        credentials,
        poll_interval: profile
            .poll_interval_ms
            .map_or(defaults.poll_interval, Duration::from_millis),
        request_timeout: profile.timeout.map_or(defaults.request_timeout, Duration::from_secs),
        monitored_controls: profile.controls.clone(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn profile(primary: &str) -> Profile {
        Profile {
            primary: primary.into(),
            secondary: None,
            username: None,
            password: None,
            password_env: None,
            poll_interval_ms: None,
            timeout: None,
            controls: Vec::new(),
        }
    }

    #[test]
    fn endpoint_parsing() {
        assert_eq!(parse_endpoint("core-a.local", "primary").unwrap(), CoreEndpoint::new("core-a.local", DEFAULT_PORT));
        assert_eq!(parse_endpoint("10.0.0.5:1712", "primary").unwrap(), CoreEndpoint::new("10.0.0.5", 1712));
        assert!(parse_endpoint("", "primary").is_err());
        assert!(parse_endpoint("core-a:notaport", "primary").is_err());
    }

    #[test]
    fn profile_without_username_has_no_credentials() {
        let config = profile_to_session_config(&profile("core-a"), "default").unwrap();
        assert!(config.credentials.is_none());
        assert_eq!(config.primary.host, "core-a");
    }

    #[test]
    fn profile_with_username_but_no_password_fails() {
        let mut p = profile("core-a");
        p.username = Some("control".into());
        let err = profile_to_session_config(&p, "default").unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { .. }));
    }

    #[test]
    fn plaintext_password_resolves() {
        let mut p = profile("core-a");
        p.username = Some("control".into());
        p.password = Some("hunter2".into());
        let credentials = resolve_credentials(&p, "default").unwrap().unwrap();
        assert_eq!(credentials.username, "control");
    }

    #[test]
    fn profile_overrides_timing() {
        let mut p = profile("core-a:1710");
        p.poll_interval_ms = Some(100);
        p.timeout = Some(2);
        p.secondary = Some("core-b".into());
        p.controls = vec!["Gain1".into()];

        let config = profile_to_session_config(&p, "default").unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.secondary, Some(CoreEndpoint::new("core-b", DEFAULT_PORT)));
        assert_eq!(config.monitored_controls, vec!["Gain1".to_owned()]);
    }

    #[test]
    fn toml_round_trip_via_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_profile = "lobby"

[profiles.lobby]
primary = "core-a.local:1710"
secondary = "core-b.local"
controls = ["Gain1", "Mute1"]
poll_interval_ms = 350
"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.active_profile_name(None), "lobby");
        let lobby = &config.profiles["lobby"];
        assert_eq!(lobby.primary, "core-a.local:1710");
        assert_eq!(lobby.controls, vec!["Gain1".to_owned(), "Mute1".to_owned()]);

        assert_eq!(config.active_profile_name(Some("other")), "other");
    }
}
