//! Command-line argument parsing and configuration.
//!
//! Supports:
//! - CLI arguments via clap
//! - TOML configuration file (`$HOME/.hypertunnel.toml` or `--config`)
//! - `HYPERTUNNEL_*` environment variables
//!
//! Precedence: CLI > environment > config file > defaults.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Default remote-signal wait in seconds.
const DEFAULT_SIGNAL_TIMEOUT_SECS: u64 = 30;

/// HyperTunnel - P2P secure copy.
///
/// Run with no arguments to receive, with `-f <path>` to send.
#[derive(Parser, Clone, Debug)]
#[command(name = "ht", version, about = "P2P secure copy")]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// File or directory to transfer (enables sender mode).
    #[clap(short = 'f', long)]
    pub file: Option<PathBuf>,

    /// Config file (default is $HOME/.hypertunnel.toml).
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity.
    #[clap(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Automatically accept incoming files and overwrites.
    #[clap(long)]
    pub auto_accept: bool,

    /// Read the remote signal from a file path, or `-` for stdin.
    #[clap(long)]
    pub signal_in: Option<String>,

    /// Write the local signal to a file path, or `-` for stdout.
    #[clap(long)]
    pub signal_out: Option<String>,

    /// Seconds to wait for the remote signal file before giving up.
    #[clap(long, default_value_t = DEFAULT_SIGNAL_TIMEOUT_SECS)]
    pub signal_timeout: u64,

    /// Disable the automatic clipboard copy of the local signal.
    #[clap(long)]
    pub no_copy: bool,

    /// Enable the terminal UI (advisory, currently inert).
    #[clap(long)]
    pub tui: bool,

    /// Disable the terminal UI (advisory, currently inert).
    #[clap(long)]
    pub no_tui: bool,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Encrypt a file with a keyphrase (writes `<file>.enc`).
    Encrypt {
        /// Keyphrase to encrypt the file with.
        #[clap(short = 'k', long = "key")]
        key: String,

        /// Buffer size in bytes.
        #[clap(short = 'b', long = "buffer", default_value_t = 1024)]
        buffer: usize,

        /// File to encrypt.
        file: PathBuf,
    },
    /// Decrypt a file with a keyphrase (writes `<file>.dec`).
    Decrypt {
        /// Keyphrase to decrypt the file with.
        #[clap(short = 'k', long = "key")]
        key: String,

        /// Buffer size in bytes.
        #[clap(short = 'b', long = "buffer", default_value_t = 1024)]
        buffer: usize,

        /// File to decrypt.
        file: PathBuf,
    },
    /// Print version information.
    Version {
        /// Print extended version information.
        #[clap(long)]
        long: bool,
    },
}

/// Subset of settings that may come from the config file.
#[derive(Deserialize, Default, Clone, Debug)]
pub struct FileConfig {
    pub verbose: Option<bool>,
    pub auto_accept: Option<bool>,
    pub signal_in: Option<String>,
    pub signal_out: Option<String>,
    pub signal_timeout: Option<u64>,
    pub no_copy: Option<bool>,
}

impl Args {
    /// Load Args from CLI + config file + environment.
    pub fn load() -> Self {
        let cli = Args::parse();
        let file = FileConfig::load(cli.config.as_deref());
        Self::merge(cli, file).apply_env()
    }

    /// Merge config-file values into CLI args (CLI takes precedence;
    /// booleans from the file only ever turn a setting on).
    fn merge(mut cli: Args, file: FileConfig) -> Args {
        if !cli.verbose {
            cli.verbose = file.verbose.unwrap_or(false);
        }
        if !cli.auto_accept {
            cli.auto_accept = file.auto_accept.unwrap_or(false);
        }
        if !cli.no_copy {
            cli.no_copy = file.no_copy.unwrap_or(false);
        }
        if cli.signal_in.is_none() {
            cli.signal_in = file.signal_in;
        }
        if cli.signal_out.is_none() {
            cli.signal_out = file.signal_out;
        }
        if cli.signal_timeout == DEFAULT_SIGNAL_TIMEOUT_SECS {
            if let Some(t) = file.signal_timeout {
                cli.signal_timeout = t;
            }
        }
        cli
    }

    /// Apply `HYPERTUNNEL_*` environment overrides.
    fn apply_env(mut self) -> Self {
        if env_flag("HYPERTUNNEL_VERBOSE") {
            self.verbose = true;
        }
        if env_flag("HYPERTUNNEL_AUTO_ACCEPT") {
            self.auto_accept = true;
        }
        if env_flag("HYPERTUNNEL_NO_COPY") {
            self.no_copy = true;
        }
        if let Ok(v) = std::env::var("HYPERTUNNEL_SIGNAL_IN") {
            if !v.is_empty() {
                self.signal_in = Some(v);
            }
        }
        if let Ok(v) = std::env::var("HYPERTUNNEL_SIGNAL_OUT") {
            if !v.is_empty() {
                self.signal_out = Some(v);
            }
        }
        if let Ok(v) = std::env::var("HYPERTUNNEL_SIGNAL_TIMEOUT") {
            if let Ok(t) = v.parse() {
                self.signal_timeout = t;
            }
        }
        self
    }
}

impl FileConfig {
    /// Load the config file from an explicit path or the default location.
    /// A missing or unparseable file yields defaults.
    fn load(explicit: Option<&Path>) -> Self {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => match dirs::home_dir() {
                Some(home) => home.join(".hypertunnel.toml"),
                None => return Self::default(),
            },
        };
        Self::from_file(&path).unwrap_or_default()
    }

    fn from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let content = fs::read_to_string(path).ok()?;
        match toml::from_str::<FileConfig>(&content) {
            Ok(cfg) => {
                tracing::debug!(event = "config_loaded", path = %path.display());
                Some(cfg)
            }
            Err(e) => {
                tracing::warn!(event = "config_parse_failure", path = %path.display(), %e);
                None
            }
        }
    }
}

/// True when the named env var is set to a truthy value.
fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("yes") | Ok("on")
    )
}
