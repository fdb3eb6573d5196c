//! Command handlers: each builds on the `Session` facade and prints
//! human-oriented output.

use std::time::Duration;

use owo_colors::OwoColorize;
use tokio::time::timeout;

use corelink_core::{
    ControlValue, EngineState, EngineStatus, LinkId, Selection, Session, SessionConfig,
};

use crate::cli::{AdjustArgs, GetArgs, SetArgs, WatchArgs};
use crate::error::CliError;

const READY_DEADLINE: Duration = Duration::from_secs(10);

// ── Session helpers ─────────────────────────────────────────────────

/// Start a session and wait until an Active core is selected.
async fn start_selected(config: SessionConfig) -> Result<Session, CliError> {
    let session = Session::new(config);
    session.start().await?;

    let mut selections = session.selection_stream();
    let selected = timeout(READY_DEADLINE, async {
        loop {
            if *selections.borrow_and_update() != Selection::None {
                return;
            }
            if selections.changed().await.is_err() {
                return;
            }
        }
    })
    .await;

    if selected.is_err() {
        session.stop().await;
        return Err(CliError::NoActiveCore);
    }
    Ok(session)
}

fn parse_value(text: &str) -> ControlValue {
    if let Ok(flag) = text.parse::<bool>() {
        return ControlValue::Bool(flag);
    }
    if let Ok(number) = text.parse::<f64>() {
        return ControlValue::Number(number);
    }
    ControlValue::Text(text.to_owned())
}

fn state_line(state: EngineState) -> String {
    match state {
        EngineState::Active => state.to_string().green().bold().to_string(),
        EngineState::Standby => state.to_string().yellow().to_string(),
        EngineState::Idle => state.to_string().blue().to_string(),
        EngineState::Unknown => state.to_string().dimmed().to_string(),
    }
}

fn print_core(label: &str, status: &EngineStatus) {
    println!("{}  {}", label.bold(), state_line(status.state));
    if !status.design_name.is_empty() {
        println!("    design: {} ({})", status.design_name, status.design_code.dimmed());
    }
    if status.is_redundant {
        println!("    {}", "redundant pair member".dimmed());
    }
    if status.is_emulator {
        println!("    {}", "emulator".dimmed());
    }
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn status(config: SessionConfig) -> Result<(), CliError> {
    let session = Session::new(config);
    session.start().await?;

    // Give status discovery a moment; report whatever is known after it.
    let mut selections = session.selection_stream();
    let _ = timeout(Duration::from_secs(3), async {
        loop {
            if *selections.borrow_and_update() != Selection::None {
                return;
            }
            if selections.changed().await.is_err() {
                return;
            }
        }
    })
    .await;

    let (primary, secondary) = session.status().await?;
    print_core("primary", &primary);
    if let Some(secondary) = secondary {
        print_core("secondary", &secondary);
    }

    for (link, state) in session.link_states() {
        let marker = match (link, session.selection()) {
            (LinkId::Primary, Selection::Primary) | (LinkId::Secondary, Selection::Secondary) => {
                " (selected)".green().to_string()
            }
            _ => String::new(),
        };
        println!("{}  link {link}: {state}{marker}", "·".dimmed());
    }

    session.stop().await;
    Ok(())
}

pub async fn watch(mut config: SessionConfig, args: WatchArgs) -> Result<(), CliError> {
    config.monitored_controls.extend(args.controls);
    if config.monitored_controls.is_empty() {
        return Err(CliError::Validation {
            field: "controls".into(),
            reason: "nothing to watch: pass control names or configure them in the profile".into(),
        });
    }

    let session = start_selected(config).await?;
    let mut changes = session.subscribe_changes();

    eprintln!("{}", "watching; ctrl-c to stop".dimmed());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = changes.recv() => {
                match change {
                    Ok(state) => {
                        let stamp = state.last_updated.format("%H:%M:%S%.3f");
                        println!(
                            "{}  {}  {}",
                            stamp.to_string().dimmed(),
                            state.name.bold(),
                            state.string,
                        );
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        eprintln!("{}", format!("lagged, {skipped} changes skipped").yellow());
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    session.stop().await;
    Ok(())
}

pub async fn get(config: SessionConfig, args: GetArgs) -> Result<(), CliError> {
    let session = start_selected(config).await?;
    let result = session.get_controls(args.names).await;
    session.stop().await;

    for state in result? {
        println!("{}  {}", state.name.bold(), state.string);
    }
    Ok(())
}

pub async fn set(config: SessionConfig, args: SetArgs) -> Result<(), CliError> {
    let session = start_selected(config).await?;
    let value = parse_value(&args.value);
    let result = session.set_control(args.name.clone(), value, args.ramp).await;
    session.stop().await;

    result?;
    println!("{} {}", "set".green(), args.name);
    Ok(())
}

pub async fn adjust(config: SessionConfig, args: AdjustArgs) -> Result<(), CliError> {
    let session = start_selected(config).await?;

    // Seed the cache so the relative read has something to read.
    let _ = session.get_controls(vec![args.name.clone()]).await;
    let result = session.adjust_control(args.name.clone(), args.delta, args.ramp).await;
    session.stop().await;

    result?;
    println!("{} {} by {:+}", "adjusted".green(), args.name, args.delta);
    Ok(())
}

pub fn config_path() -> Result<(), CliError> {
    println!("{}", corelink_config::config_path().display());
    Ok(())
}

pub fn config_show() -> Result<(), CliError> {
    let config = corelink_config::load_config_or_default();
    let default = config.active_profile_name(None);

    if config.profiles.is_empty() {
        println!("{}", "no profiles configured".dimmed());
        return Ok(());
    }

    let mut names: Vec<&String> = config.profiles.keys().collect();
    names.sort();
    for name in names {
        let profile = &config.profiles[name];
        let marker = if *name == default { " (default)".green().to_string() } else { String::new() };
        println!("{}{}", name.bold(), marker);
        println!("    primary: {}", profile.primary);
        if let Some(ref secondary) = profile.secondary {
            println!("    secondary: {secondary}");
        }
        if !profile.controls.is_empty() {
            println!("    controls: {}", profile.controls.join(", "));
        }
    }
    Ok(())
}
