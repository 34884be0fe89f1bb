//! Command-line argument definition
// (c) 2025 Ross Younger

use std::{ffi::OsString, path::PathBuf};

use clap::{ArgAction, Parser};

use crate::config::ConfigurationOverrides;

/// Inspects the transport configuration that would be used on this system
#[derive(Debug, Parser, Clone, Default)]
#[command(
    author,
    version,
    about,
    long_about = "Resolves the downchannel transport configuration from defaults, configuration files, the environment and the command line, then prints it.",
    infer_long_args(true)
)]
pub(crate) struct CliArgs {
    // MODE SELECTION ======================================================================
    /// Outputs the resolved configuration, and where each value came from, then exits.
    /// This is the default mode.
    #[arg(long, action(ArgAction::SetTrue), help_heading("Configuration"), display_order(0))]
    pub(crate) show_config: bool,

    /// Outputs the paths to configuration file(s), then exits
    #[arg(
        long,
        action(ArgAction::SetTrue),
        conflicts_with("show_config"),
        help_heading("Configuration"),
        display_order(0)
    )]
    pub(crate) config_files: bool,

    /// Reads this configuration file, in addition to the system and user files
    #[arg(long, value_name("FILE"), help_heading("Configuration"), display_order(0))]
    pub(crate) config: Option<PathBuf>,

    // DEBUG & OUTPUT ======================================================================
    /// Enable detailed debug output
    ///
    /// This has the same effect as setting `RUST_LOG=downchannel=debug` in the environment.
    /// If present, `RUST_LOG` overrides this option.
    #[arg(short, long, action, help_heading("Debug"), display_order(0))]
    pub(crate) debug: bool,

    /// Log to a file
    ///
    /// By default the log receives everything printed to stderr.
    /// To override this behaviour, set the environment variable `RUST_LOG_FILE_DETAIL` (same semantics as `RUST_LOG`).
    #[arg(
        short('l'),
        long,
        action,
        value_name("FILE"),
        help_heading("Output options"),
        next_line_help(true)
    )]
    pub(crate) log_file: Option<String>,

    // CONFIGURATION OVERRIDES =============================================================
    #[command(flatten)]
    pub(crate) overrides: ConfigurationOverrides,
}

/// What the program has been asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MainMode {
    ShowConfig,
    ShowConfigFiles,
}

impl CliArgs {
    pub(crate) fn custom_parse<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from(args)
    }

    pub(crate) fn mode(&self) -> MainMode {
        if self.config_files {
            MainMode::ShowConfigFiles
        } else {
            MainMode::ShowConfig
        }
    }
}
