// (c) 2025 Ross Younger
//! # 📖 Configuration management
//!
//! downchannel obtains run-time configuration from the following sources, in order of
//! decreasing priority:
//! 1. Command-line options
//! 2. Environment variables prefixed `DOWNCHANNEL_` (for example `DOWNCHANNEL_PING_TIMEOUT=10`)
//! 3. A configuration file named with `--config`
//! 4. The user's configuration file, `downchannel/downchannel.toml` in the platform
//!    configuration directory (on Linux, `~/.config/downchannel/downchannel.toml`)
//! 5. The system-wide configuration file, `/etc/downchannel.toml`
//! 6. Hard-wired defaults
//!
//! Run `downchannel --config-files` for a list of which files we read.
//!
//! ## File format
//!
//! Files are [TOML](https://toml.io/). Keys are the field names of [Configuration]:
//!
//! ```toml
//! endpoint = "https://service.example"
//! max_total_streams = 6
//! inactivity_timeout = 120
//! time_format = "utc"
//! ```
//!
//! ## Configurable options
//!
//! The set of supported fields is the [Configuration] structure.
//!
//! * `downchannel --show-config` outputs the current values and where each came from.
//! * `downchannel --config-files` outputs the list of configuration files for the current user
//!   and platform.

mod manager;
pub use manager::{Manager, ENV_PREFIX};

mod structure;
pub use structure::{Configuration, ConfigurationOverrides, MINIMUM_TOTAL_STREAMS};

mod sysdefault;
use sysdefault::SystemDefault;
