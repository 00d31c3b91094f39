use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uuid::Uuid;

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text (default)
    #[default]
    Text,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
}

#[derive(Parser)]
#[command(version, about = "Persistent design sessions with undo/redo history")]
pub struct Cli {
    /// Session name (defaults to the base directory's name)
    #[arg(long = "name", global = true)]
    pub session: Option<String>,

    /// Directory holding `<name>.session` (defaults to config, then the working directory)
    #[arg(long, global = true)]
    pub basedir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the session directory
    Init {
        /// Remove any existing session with the same name first
        #[arg(long)]
        delete_existing: bool,

        /// Number of history records to keep
        #[arg(long)]
        depth: Option<usize>,
    },
    /// Print data, tolerance, settings, scene and history
    Show,
    /// Print a data value as JSON
    Get {
        key: String,
        /// Print this instead of failing when the key is missing
        #[arg(long)]
        default: Option<String>,
    },
    /// Store a data value
    ///
    /// The value is parsed as JSON; anything that is not valid JSON is stored as a string.
    #[command(
        after_help = "EXAMPLES:
    dsess set span 12.5
    dsess set levels '[0, 3.2, 6.4]'
    dsess set label 'north facade'
    dsess set grid --from-file survey.json --field grid"
    )]
    Set {
        key: String,
        #[arg(required_unless_present = "from_file")]
        value: Option<String>,
        /// Read the value from a JSON file instead
        #[arg(long, conflicts_with = "value")]
        from_file: Option<PathBuf>,
        /// Pick one top-level field from --from-file
        #[arg(long, requires = "from_file")]
        field: Option<String>,
    },
    /// Delete a data value
    Remove { key: String },
    /// List data keys
    Keys,
    /// Snapshot the current state into history
    Record {
        /// Name for this state (e.g. "add columns")
        name: String,
    },
    /// Restore the previous history record
    Undo,
    /// Restore the next history record
    Redo,
    /// Show recorded history
    History {
        #[arg(short = 'f', long, default_value = "text", value_enum)]
        format: OutputFormat,
    },
    /// Delete every history record
    ClearHistory,
    /// Write the complete state to disk
    Dump {
        /// Export into another directory instead of the session directory
        #[arg(long)]
        to: Option<PathBuf>,
    },
    /// View or modify session settings
    Settings(SettingsArgs),
    /// View or modify the scene
    Scene(SceneArgs),
    /// View or modify configuration settings
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct SettingsArgs {
    #[command(subcommand)]
    pub action: SettingsAction,
}

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Print the session settings
    Show,
    /// Set one settings field (value parsed as JSON, falling back to a string)
    Set { key: String, value: String },
}

#[derive(Args)]
pub struct SceneArgs {
    #[command(subcommand)]
    pub action: SceneAction,
}

#[derive(Subcommand)]
pub enum SceneAction {
    /// Print the scene tree
    Show,
    /// Add an object to the scene
    Add {
        name: String,
        /// JSON item attached to the object
        #[arg(long)]
        item: Option<String>,
        /// Id of the parent object
        #[arg(long)]
        parent: Option<Uuid>,
    },
    /// Remove an object and its children
    Remove { id: Uuid },
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Display current configuration settings
    #[command(
        after_help = "CONFIG FILE LOCATION:
    $XDG_CONFIG_HOME/design-session/config.toml
    or ~/.config/design-session/config.toml"
    )]
    Show,

    /// Set a configuration value
    #[command(
        after_help = "AVAILABLE SETTINGS:
    basedir    Directory holding sessions (default: working directory)
    depth      History records kept per session (default: 53)
    color      Colored output: true or false (default: true)"
    )]
    Set {
        /// Configuration key to set
        key: String,
        /// New value for the configuration key
        value: String,
    },
}

/// Parse CLI input as JSON, keeping bare words as strings.
pub fn parse_json_arg(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}
