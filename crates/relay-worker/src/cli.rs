//! Command-line interface definitions using clap.

use crate::config::Config;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

/// Run Relay workers against a channel layer.
#[derive(Parser, Debug, Default)]
#[command(name = "relay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file; defaults to the first of the standard locations.
    #[arg(short, long, env = "RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Channel layer backend to use.
    #[arg(long)]
    pub layer: Option<String>,

    /// Only listen on channels matching this glob (repeatable).
    #[arg(long = "only-channels", value_name = "GLOB")]
    pub only_channels: Vec<String>,

    /// Never listen on channels matching this glob (repeatable).
    #[arg(long = "exclude-channels", value_name = "GLOB")]
    pub exclude_channels: Vec<String>,

    /// Number of workers in this process.
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub threads: Option<u16>,

    /// More logging (-v for debug with per-message logs, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    pub print_config: bool,
}

impl Cli {
    /// Load the configuration file and apply the command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or the result
    /// is invalid.
    pub fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::load()?,
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Override config fields with whatever was given on the command line.
    pub fn apply(&self, config: &mut Config) {
        if let Some(layer) = &self.layer {
            config.layer.backend = layer.clone();
        }
        if !self.only_channels.is_empty() {
            config.worker.only_channels = self.only_channels.clone();
        }
        if !self.exclude_channels.is_empty() {
            config.worker.exclude_channels = self.exclude_channels.clone();
        }
        if let Some(threads) = self.threads {
            config.worker.threads = usize::from(threads);
        }
        if self.quiet {
            config.worker.verbosity = 0;
        } else if self.verbose > 0 {
            config.worker.verbosity = self.verbose.saturating_add(1).min(3);
        }
    }
}
