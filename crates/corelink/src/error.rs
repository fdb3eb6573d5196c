//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use corelink_config::ConfigError;
use corelink_core::CoreError;

/// Exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Redundancy / connection ──────────────────────────────────────
    #[error("No core is currently Active")]
    #[diagnostic(
        code(corelink::no_active_core),
        help(
            "Mutating commands route only to an Active core.\n\
             Check reachability and status with: corelink status"
        )
    )]
    NoActiveCore,

    #[error("Core connection lost")]
    #[diagnostic(
        code(corelink::link_lost),
        help("The link dropped while the command was in flight. Retry once the core is back.")
    )]
    LinkLost,

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(corelink::timeout),
        help("Increase timeout with --timeout or check core responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(corelink::auth_failed),
        help(
            "Verify the username and password for this design.\n\
             Pass credentials via --username and --password-env."
        )
    )]
    AuthFailed { message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(corelink::no_credentials),
        help("Set password or password_env for the profile, or pass --password-env.")
    )]
    NoCredentials { profile: String },

    // ── Controls ─────────────────────────────────────────────────────
    #[error("Unknown control: {name}")]
    #[diagnostic(
        code(corelink::unknown_control),
        help("The control is not mirrored yet. Watch it first or check the name.")
    )]
    UnknownControl { name: String },

    #[error("Remote error ({code}): {message}")]
    #[diagnostic(code(corelink::remote_error))]
    Remote { code: i64, message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(corelink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(corelink::profile_not_found),
        help("List configured profiles with: corelink config show")
    )]
    ProfileNotFound { name: String },

    #[error("No core configured")]
    #[diagnostic(
        code(corelink::no_config),
        help(
            "Pass --primary <host[:port]> or create a profile.\n\
             Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(corelink::config))]
    Config(Box<figment::Error>),

    // ── Fallthrough ──────────────────────────────────────────────────
    #[error("{0}")]
    #[diagnostic(code(corelink::operation_failed))]
    Operation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoActiveCore | Self::LinkLost => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::UnknownControl { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NoActiveCore => CliError::NoActiveCore,
            CoreError::LinkLost => CliError::LinkLost,
            CoreError::Timeout(deadline) => CliError::Timeout { seconds: deadline.as_secs() },
            CoreError::Remote { code, message } => CliError::Remote { code, message },
            CoreError::UnknownControl { name } => CliError::UnknownControl { name },
            CoreError::NotNumeric { name, value } => CliError::Validation {
                field: name,
                reason: format!("not numeric (current value: {value})"),
            },
            CoreError::UnknownGroup { id } => {
                CliError::Operation(format!("unknown change group: {id}"))
            }
            other => CliError::Operation(other.to_string()),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::UnknownProfile { profile } => CliError::ProfileNotFound { name: profile },
            ConfigError::Figment(e) => CliError::Config(e),
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Operation(other.to_string()),
        }
    }
}
