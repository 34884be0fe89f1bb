//! Main CLI for downchannel
// (c) 2025 Ross Younger

use std::{ffi::OsString, io::Write as _, process::ExitCode};

use anyhow::Result;
use tracing::{debug, info};

use super::args::{CliArgs, MainMode};
use crate::{
    config::Manager,
    util::{setup_tracing, trace_level, ConsoleTraceType},
};

/// Main CLI entrypoint
///
/// Call this from `main`, passing the arguments to use.
/// Normally you will call `cli(std::env::args_os())` but you can pass in alternate arguments for CLI testing.
#[must_use]
pub fn cli<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    #[allow(clippy::match_bool)] // improved readability
    cli_inner(args)
        .inspect_err(|e| {
            if crate::util::tracing_is_initialised() {
                tracing::error!("{e:#}");
            } else {
                eprintln!("Error: {e:#}");
            }
        })
        .map_or(ExitCode::FAILURE, |success| match success {
            true => ExitCode::SUCCESS,
            false => ExitCode::FAILURE,
        })
}

/// Inner CLI logic
///
/// # Return
/// true indicates success. false indicates a failure where the callee has output to stderr.
fn cli_inner<I, T>(args: I) -> Result<bool>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let Some(args) = parse_args(args)? else {
        return Ok(true); // help/version shown; exit
    };

    let mut manager = Manager::standard(args.config.as_deref());
    manager.merge_provider(args.overrides.clone());
    // Validation errors surface here, before anything else happens
    let config = manager.get()?;

    setup_tracing(
        trace_level(args.debug),
        ConsoleTraceType::Standard,
        args.log_file.as_ref(),
        config.time_format,
        true,
    )?; // to provoke error: set RUST_LOG=.
    debug!("{}", config.format_summary());

    match args.mode() {
        MainMode::ShowConfigFiles => {
            let _ = writeln!(std::io::stdout(), "{:?}", Manager::config_files());
        }
        MainMode::ShowConfig => {
            let _ = write!(std::io::stdout(), "{}", manager.to_display()?);
            info!(
                event_streams = config.max_post_streams(),
                "configuration is valid"
            );
        }
    }
    Ok(true)
}

fn parse_args<I, T>(args: I) -> Result<Option<CliArgs>>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    use clap::error::ErrorKind::{DisplayHelp, DisplayVersion};
    match CliArgs::custom_parse(args) {
        Ok(args) => Ok(Some(args)),
        Err(e) if matches!(e.kind(), DisplayHelp | DisplayVersion) => {
            let _ = write!(std::io::stdout(), "{}", e.render());
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
