//! Clap derive structures for the `corelink` CLI.

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// corelink -- live control link to one or two redundant AV cores
#[derive(Debug, Parser)]
#[command(
    name = "corelink",
    version,
    about = "Monitor and mutate named controls on AV processing cores",
    long_about = "A control-link client for AV processing cores speaking the\n\
        line-delimited JSON-RPC control protocol. Maintains sessions to one\n\
        or two redundant cores, mirrors control values locally via change\n\
        groups, and routes mutations to whichever core is Active.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Core profile to use
    #[arg(long, short = 'p', env = "CORELINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Primary core as host or host:port (overrides profile)
    #[arg(long, env = "CORELINK_PRIMARY", global = true)]
    pub primary: Option<String>,

    /// Secondary core of a redundant pair (overrides profile)
    #[arg(long, env = "CORELINK_SECONDARY", global = true)]
    pub secondary: Option<String>,

    /// Logon username, when the design has access control enabled
    #[arg(long, env = "CORELINK_USERNAME", global = true)]
    pub username: Option<String>,

    /// Environment variable holding the logon password
    #[arg(long, global = true)]
    pub password_env: Option<String>,

    /// Change-group poll interval in milliseconds (30-60000)
    #[arg(long, global = true)]
    pub poll_interval_ms: Option<u64>,

    /// Request timeout in seconds
    #[arg(long, env = "CORELINK_TIMEOUT", default_value = "5", global = true)]
    pub timeout: u64,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show per-core engine status and the current selection
    #[command(alias = "st")]
    Status,

    /// Mirror controls into a change group and stream their changes
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Fetch the current value of named controls
    #[command(alias = "g")]
    Get(GetArgs),

    /// Set a named control on the Active core
    #[command(alias = "s")]
    Set(SetArgs),

    /// Adjust a numeric control relative to its mirrored value
    #[command(alias = "adj")]
    Adjust(AdjustArgs),

    /// Inspect the configuration file and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Controls to watch (added to the profile's configured list)
    pub controls: Vec<String>,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Control names to fetch
    #[arg(required = true)]
    pub names: Vec<String>,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Control name
    pub name: String,

    /// New value: true/false, a number, or free text
    pub value: String,

    /// Ramp time in seconds
    #[arg(long, short = 'r')]
    pub ramp: Option<f64>,
}

#[derive(Debug, Args)]
pub struct AdjustArgs {
    /// Control name
    pub name: String,

    /// Signed delta applied to the mirrored value
    #[arg(allow_hyphen_values = true)]
    pub delta: f64,

    /// Ramp time in seconds
    #[arg(long, short = 'r')]
    pub ramp: Option<f64>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the resolved config file path
    Path,
    /// List configured profiles
    Show,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: clap_complete::Shell,
}
