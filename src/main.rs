mod cli;
mod config;
mod output;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use cli::{parse_json_arg, Cli, Command, ConfigAction, OutputFormat, SceneAction, SettingsAction};
use config::Config;
use design_session::types::SessionSettings;
use design_session::{Session, SessionOptions};
use output::OutputFormatter;
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli) {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// `RUST_LOG` when set, otherwise `warn`; `-v`/`-vv` raise the global level.
fn log_filter(verbose: u8) -> EnvFilter {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    match verbose {
        0 => filter,
        1 => filter.add_directive(tracing::Level::INFO.into()),
        _ => filter.add_directive(tracing::Level::DEBUG.into()),
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;

    // Config commands never touch a session directory.
    if let Command::Config(args) = &cli.command {
        match &args.action {
            ConfigAction::Show => println!("{}", config.display()),
            ConfigAction::Set { key, value } => match Config::set_value(key, value)? {
                Some(old) => println!("Updated '{}': '{}' -> '{}'", key, old, value),
                None => println!("Set '{}': '{}'", key, value),
            },
        }
        return Ok(());
    }

    let mut options: SessionOptions = SessionOptions::new();
    if let Some(name) = cli.session.clone() {
        options = options.with_name(name);
    }
    if let Some(basedir) = cli.basedir.clone().or_else(|| config.basedir.clone()) {
        options = options.with_basedir(basedir);
    }
    if let Command::Init {
        delete_existing,
        depth,
    } = &cli.command
    {
        // Other commands keep the depth stored in the session's history file.
        options = options
            .delete_existing(*delete_existing)
            .with_depth(depth.unwrap_or(config.depth));
    }

    let mut session = Session::open(options).context("failed to open session")?;
    debug!(session = %session.name(), "running command");
    let formatter = OutputFormatter::new(config.color);

    match cli.command {
        Command::Init { .. } => {
            session.dump()?;
            println!(
                "Initialized session '{}' at {}",
                session.name(),
                session.sessiondir().display()
            );
        }
        Command::Show => {
            session.scene()?;
            session.settings()?;
            for key in session.keys()? {
                session.get(&key)?;
            }
            println!("{session}");
        }
        Command::Get { key, default } => match session.get(&key)?.cloned() {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => match default {
                Some(default) => println!("{default}"),
                None => {
                    eprintln!("Key '{}' not found in session '{}'", key, session.name());
                    std::process::exit(2);
                }
            },
        },
        Command::Set {
            key,
            value,
            from_file,
            field,
        } => {
            match (value, from_file) {
                (_, Some(path)) => {
                    if session
                        .set_from_file(&key, &path, field.as_deref())?
                        .is_none()
                    {
                        return Err(anyhow!(
                            "field '{}' not found in {}",
                            field.unwrap_or_default(),
                            path.display()
                        ));
                    }
                }
                (Some(raw), None) => session.set(&key, parse_json_arg(&raw))?,
                (None, None) => return Err(anyhow!("a value or --from-file is required")),
            }
            // Without autosync the value only lives in this process.
            if !session.settings()?.autosync() {
                session.dump()?;
            }
            println!("Set '{}' in session '{}'", key, session.name());
        }
        Command::Remove { key } => match session.remove(&key)? {
            Some(_) => println!("Removed '{}'", key),
            None => println!("Key '{}' was not set", key),
        },
        Command::Keys => {
            for key in session.keys()? {
                println!("{key}");
            }
        }
        Command::Record { name } => {
            let record = session.record(&name)?;
            println!("Recorded '{}' ({})", record.name, record.id);
        }
        Command::Undo => {
            let moved = session.undo()?;
            let record = session.current().map(|index| &session.history()[index]);
            println!("{}", formatter.format_move("Undo", moved, record));
        }
        Command::Redo => {
            let moved = session.redo()?;
            let record = session.current().map(|index| &session.history()[index]);
            println!("{}", formatter.format_move("Redo", moved, record));
        }
        Command::History { format } => {
            let current = session.current().map(|index| index as i64).unwrap_or(-1);
            let output = serde_json::json!({
                "session": session.name(),
                "depth": session.depth(),
                "current": current,
                "records": session.history(),
            });
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
                OutputFormat::JsonCompact => println!("{}", serde_json::to_string(&output)?),
                OutputFormat::Text => println!(
                    "{}",
                    formatter.format_history(session.history(), session.current(), session.name())
                ),
            }
        }
        Command::ClearHistory => {
            let count = session.history().len();
            session.clear_history()?;
            println!("Cleared {} record{}", count, if count == 1 { "" } else { "s" });
        }
        Command::Dump { to } => match to {
            Some(dir) => {
                session.dump_to(&dir)?;
                println!("Exported session '{}' to {}", session.name(), dir.display());
            }
            None => {
                session.dump()?;
                println!("Dumped session '{}'", session.name());
            }
        },
        Command::Settings(args) => match args.action {
            SettingsAction::Show => {
                println!("{}", serde_json::to_string_pretty(session.settings()?)?);
            }
            SettingsAction::Set { key, value } => {
                session
                    .settings_mut()?
                    .set_field(&key, parse_json_arg(&value))
                    .with_context(|| format!("invalid value for setting '{key}'"))?;
                session.dump_settings()?;
                println!("Set setting '{}' = {}", key, value);
            }
        },
        Command::Scene(args) => match args.action {
            SceneAction::Show => println!("{}", session.scene()?),
            SceneAction::Add { name, item, parent } => {
                let item = item.as_deref().map(parse_json_arg).unwrap_or_default();
                let id = session.scene_mut()?.add(name.clone(), item, parent)?;
                session.dump_scene()?;
                println!("Added '{}' ({})", name, id);
            }
            SceneAction::Remove { id } => match session.scene_mut()?.remove(id) {
                Some(object) => {
                    session.dump_scene()?;
                    println!("Removed '{}' and {} child object(s)", object.name, object.children.len());
                }
                None => return Err(anyhow!("scene object {} not found", id)),
            },
        },
        Command::Config(_) => unreachable!("handled before opening the session"),
    }

    Ok(())
}
