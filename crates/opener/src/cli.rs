//! Clap derive structures for the `opener` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// opener -- manage gates and the phones allowed to open them
#[derive(Debug, Parser)]
#[command(
    name = "opener",
    version,
    about = "Manage opener gates and phones from the command line",
    long_about = "Reads gates and phones through a live replica of the document store\n\
        and writes straight to the store. Every write is confirmed by waiting\n\
        for the change to come back through the collection feed.",
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
    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "OPENER_CONFIG_FILE", global = true)]
    pub config: Option<PathBuf>,

    /// JSON store file (overrides [store].path)
    #[arg(long, env = "OPENER_STORE_PATH", global = true)]
    pub store: Option<PathBuf>,

    /// Output format (overrides [defaults].output)
    #[arg(long, short = 'o', env = "OPENER_OUTPUT_FORMAT", global = true)]
    pub output: Option<OutputFormat>,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Store round-trip timeout in milliseconds (overrides config)
    #[arg(long, env = "OPENER_TIMEOUT_MS", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage gates and their allowed phones
    #[command(alias = "g")]
    Gates(GatesArgs),

    /// Manage phones
    #[command(alias = "p")]
    Phones(PhonesArgs),

    /// Show replica readiness and collection sizes
    Status,

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Gates ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GatesArgs {
    #[command(subcommand)]
    pub command: GatesCommand,
}

#[derive(Debug, Subcommand)]
pub enum GatesCommand {
    /// List all gates
    #[command(alias = "ls")]
    List,

    /// Show one gate
    Get {
        /// Gate id
        id: String,
    },

    /// Create (or overwrite) a gate under the given id
    Create {
        /// Gate id
        id: String,

        /// Display name
        #[arg(long)]
        name: Option<String>,

        /// Hardware device id
        #[arg(long)]
        device_id: Option<String>,

        /// JSON file with the full gate body (camelCase fields)
        #[arg(long, short = 'F')]
        from_file: Option<PathBuf>,
    },

    /// Delete a gate
    #[command(alias = "rm")]
    Delete {
        /// Gate id
        id: String,
    },

    /// Allow a phone key to open a gate
    AddPhone {
        /// Gate id
        gate_id: String,
        /// Phone key
        key: i64,
    },

    /// Revoke a phone key from a gate
    RemovePhone {
        /// Gate id
        gate_id: String,
        /// Phone key
        key: i64,
    },

    /// Set a gate's rolling code
    RollingCode {
        /// Gate id
        gate_id: String,
        /// New rolling code
        code: u32,
    },

    /// List the gates a phone key may open
    ForPhone {
        /// Phone key
        key: i64,
    },
}

// ── Phones ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct PhonesArgs {
    #[command(subcommand)]
    pub command: PhonesCommand,
}

#[derive(Debug, Subcommand)]
pub enum PhonesCommand {
    /// List all phones
    #[command(alias = "ls")]
    List,

    /// Show one phone (by id, or by key when no id matches)
    Get {
        /// Phone id or key
        phone: String,
    },

    /// Register a new phone. Fails if the key is already taken.
    Create {
        /// Numeric key, unique across phones
        #[arg(long)]
        key: i64,

        /// Display name
        #[arg(long)]
        name: String,

        #[arg(long, default_value = "")]
        owner: String,

        #[arg(long, default_value = "")]
        number: String,

        #[arg(long, default_value = "")]
        email: String,
    },

    /// Change selected fields of a phone
    Update {
        /// Phone id or key
        phone: String,

        #[arg(long)]
        pin: Option<i64>,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        uid: Option<String>,

        #[arg(long)]
        number: Option<String>,

        #[arg(long)]
        email: Option<String>,
    },

    /// Delete a phone
    #[command(alias = "rm")]
    Delete {
        /// Phone id or key
        phone: String,
    },

    /// Mark a phone active
    Activate {
        /// Phone id or key
        phone: String,
    },

    /// Mark a phone inactive
    Deactivate {
        /// Phone id or key
        phone: String,
    },

    /// Issue an activation code (stamped with the store's clock)
    SetActivation {
        /// Phone id or key
        phone: String,
        /// Activation code
        code: i64,
    },

    /// Send a notification to the phone's owner
    Notify {
        /// Phone id or key
        phone: String,
    },
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Display current resolved configuration
    Show,

    /// Print the config file path
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
