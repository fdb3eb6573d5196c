mod cli;
mod commands;
mod error;

use std::time::Duration;

use clap::Parser;
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

use corelink_core::{Credentials, SessionConfig};

use crate::cli::{Cli, Command, ConfigAction, GlobalOpts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config commands don't need a core connection
        Command::Config(args) => match args.action {
            ConfigAction::Path => commands::config_path(),
            ConfigAction::Show => commands::config_show(),
        },

        // Shell completions generation
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "corelink", &mut std::io::stdout());
            Ok(())
        }

        // All other commands require a session
        command => {
            let config = build_session_config(&cli.global)?;
            tracing::debug!(command = ?command, "dispatching command");
            match command {
                Command::Status => commands::status(config).await,
                Command::Watch(args) => commands::watch(config, args).await,
                Command::Get(args) => commands::get(config, args).await,
                Command::Set(args) => commands::set(config, args).await,
                Command::Adjust(args) => commands::adjust(config, args).await,
                Command::Config(_) | Command::Completions(_) => unreachable!("handled above"),
            }
        }
    }
}

/// Build a `SessionConfig` from the config file, profile, and CLI
/// overrides.
fn build_session_config(global: &GlobalOpts) -> Result<SessionConfig, CliError> {
    let file_config = corelink_config::load_config_or_default();
    let profile_name = file_config.active_profile_name(global.profile.as_deref());

    let mut config = if let Some(profile) = file_config.profiles.get(&profile_name) {
        corelink_config::profile_to_session_config(profile, &profile_name)?
    } else if global.profile.is_some() {
        // An explicitly requested profile must exist.
        return Err(CliError::ProfileNotFound { name: profile_name });
    } else if let Some(ref primary) = global.primary {
        SessionConfig::new(corelink_config::parse_endpoint(primary, "primary")?)
    } else {
        return Err(CliError::NoConfig {
            path: corelink_config::config_path().display().to_string(),
        });
    };

    // CLI flags override whatever the profile said.
    if let Some(ref primary) = global.primary {
        config.primary = corelink_config::parse_endpoint(primary, "primary")?;
    }
    if let Some(ref secondary) = global.secondary {
        config.secondary = Some(corelink_config::parse_endpoint(secondary, "secondary")?);
    }
    if let Some(ref username) = global.username {
        let env_name = global.password_env.as_deref().unwrap_or("CORELINK_PASSWORD");
        let password = std::env::var(env_name).map_err(|_| CliError::NoCredentials {
            profile: profile_name.clone(),
        })?;
        config.credentials = Some(Credentials {
            username: username.clone(),
            password: SecretString::from(password),
        });
    }
    if let Some(poll_ms) = global.poll_interval_ms {
        config.poll_interval = Duration::from_millis(poll_ms);
    }
    config.request_timeout = Duration::from_secs(global.timeout);

    Ok(config)
}
