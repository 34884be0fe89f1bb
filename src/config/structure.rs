//! Configuration structure
// (c) 2025 Ross Younger

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use human_repr::{HumanCount as _, HumanDuration as _};
use serde::{Deserialize, Serialize};

use crate::util::TimeFormat;

/// The smallest stream budget that leaves room for one event stream
/// (one stream each for the downchannel and ping, plus at least one event)
pub const MINIMUM_TOTAL_STREAMS: u16 = 3;

/// The set of configurable options.
///
/// ### Configuration files
///
/// Files are TOML; keys are the field names below, e.g. `inactivity_timeout = 120`.
/// Environment variables use the prefix `DOWNCHANNEL_`, e.g. `DOWNCHANNEL_MAX_TOTAL_STREAMS=6`.
///
/// [More details about the configuration mechanism](crate::config).
///
/// ### Developer notes
/// There is no `default()`.
/// The hard-wired defaults are available through [`Configuration::system_default()`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Configuration {
    /// Base URL of the service, without a trailing slash
    pub endpoint: String,
    /// Path of the downchannel request
    pub downchannel_path: String,
    /// Path that events are posted to, unless a message overrides it
    pub event_path: String,
    /// Path of the ping request
    pub ping_path: String,

    /// Number of concurrent streams allowed on the connection.
    /// One is reserved for the downchannel and one for pings; the rest carry events.
    pub max_total_streams: u16,

    /// How long the connection may go without receiving anything before a ping is sent, in seconds
    pub inactivity_timeout: u32,
    /// How long a ping may take, in seconds
    pub ping_timeout: u32,
    /// How long an event stream may go without progress, in seconds
    pub stream_progress_timeout: u32,
    /// How long the downchannel may take to be established, in seconds
    pub connection_timeout: u32,

    /// Base delay between downchannel attempts, in milliseconds
    pub reconnect_backoff_min: u64,
    /// Upper bound on the delay between downchannel attempts, in milliseconds
    pub reconnect_backoff_max: u64,

    /// Largest error body kept for reporting to message observers, in bytes
    pub max_exception_body: usize,

    /// Format of timestamps in log output
    pub time_format: TimeFormat,
}

static SYSTEM_DEFAULT_CONFIG: LazyLock<Configuration> = LazyLock::new(|| Configuration {
    endpoint: "https://localhost".into(),
    downchannel_path: "/directives".into(),
    event_path: "/events".into(),
    ping_path: "/ping".into(),
    max_total_streams: 10,
    inactivity_timeout: 300,
    ping_timeout: 30,
    stream_progress_timeout: 15,
    connection_timeout: 60,
    reconnect_backoff_min: 1000,
    reconnect_backoff_max: 256_000,
    max_exception_body: 65536,
    time_format: TimeFormat::Local,
});

impl Configuration {
    /// Returns the system default settings
    #[must_use]
    pub fn system_default() -> &'static Self {
        &SYSTEM_DEFAULT_CONFIG
    }

    /// Number of streams available for events
    #[must_use]
    pub fn max_post_streams(&self) -> usize {
        usize::from(self.max_total_streams.saturating_sub(2))
    }

    /// Accessor for `inactivity_timeout`, as a Duration
    #[must_use]
    pub fn inactivity_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout.into())
    }

    /// Accessor for `ping_timeout`, as a Duration
    #[must_use]
    pub fn ping_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.ping_timeout.into())
    }

    /// Accessor for `stream_progress_timeout`, as a Duration
    #[must_use]
    pub fn stream_progress_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.stream_progress_timeout.into())
    }

    /// Accessor for `connection_timeout`, as a Duration
    #[must_use]
    pub fn connection_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connection_timeout.into())
    }

    /// The reconnect backoff bounds, as Durations
    #[must_use]
    pub fn reconnect_backoff(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.reconnect_backoff_min),
            Duration::from_millis(self.reconnect_backoff_max),
        )
    }

    fn url_for(&self, path: &str) -> String {
        let base = self.endpoint.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    /// Full URL of the downchannel
    #[must_use]
    pub fn downchannel_url(&self) -> String {
        self.url_for(&self.downchannel_path)
    }

    /// Full URL of the ping request
    #[must_use]
    pub fn ping_url(&self) -> String {
        self.url_for(&self.ping_path)
    }

    /// Full URL for an event, honouring a per-message path override
    #[must_use]
    pub fn event_url(&self, path_override: Option<&str>) -> String {
        self.url_for(path_override.unwrap_or(&self.event_path))
    }

    /// Formats the stream-related options for display
    #[must_use]
    pub fn format_summary(&self) -> String {
        format!(
            "{endpoint}: {streams} streams ({events} for events), inactivity {inactivity}, ping timeout {ping}, reconnect {rmin} to {rmax}, error bodies up to {body}",
            endpoint = self.endpoint,
            streams = self.max_total_streams,
            events = self.max_post_streams(),
            inactivity = self.inactivity_timeout_duration().human_duration(),
            ping = self.ping_timeout_duration().human_duration(),
            rmin = self.reconnect_backoff().0.human_duration(),
            rmax = self.reconnect_backoff().1.human_duration(),
            body = self.max_exception_body.human_count_bytes(),
        )
    }

    /// Performs additional validation checks on a configuration object
    pub fn validate(&self) -> Result<()> {
        if self.max_total_streams < MINIMUM_TOTAL_STREAMS {
            anyhow::bail!(
                "max_total_streams ({}) is too small; it must be at least {MINIMUM_TOTAL_STREAMS}",
                self.max_total_streams
            );
        }
        for (name, value) in [
            ("inactivity_timeout", self.inactivity_timeout),
            ("ping_timeout", self.ping_timeout),
            ("stream_progress_timeout", self.stream_progress_timeout),
            ("connection_timeout", self.connection_timeout),
        ] {
            anyhow::ensure!(value > 0, "{name} must not be zero");
        }
        anyhow::ensure!(
            self.reconnect_backoff_min > 0,
            "reconnect_backoff_min must not be zero"
        );
        anyhow::ensure!(
            self.reconnect_backoff_min <= self.reconnect_backoff_max,
            "reconnect_backoff_min ({}) exceeds reconnect_backoff_max ({})",
            self.reconnect_backoff_min,
            self.reconnect_backoff_max
        );
        anyhow::ensure!(
            self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://"),
            "endpoint must be an http or https URL"
        );
        Ok(())
    }
}

/// Command-line overrides for [`Configuration`].
///
/// Every field is optional; only those given on the command line are merged over the
/// lower-priority sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Args, Serialize)]
pub struct ConfigurationOverrides {
    /// Base URL of the service
    #[arg(long, help_heading("Configuration"), value_name("URL"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Number of concurrent streams allowed (at least 3)
    #[arg(long, help_heading("Configuration"), value_name("N"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_total_streams: Option<u16>,

    /// Inactivity period before a ping is sent, in seconds
    #[arg(long, help_heading("Configuration"), value_name("s"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactivity_timeout: Option<u32>,

    /// Ping timeout, in seconds
    #[arg(long, help_heading("Configuration"), value_name("s"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_timeout: Option<u32>,

    /// Downchannel establishment timeout, in seconds
    #[arg(long, help_heading("Configuration"), value_name("s"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_timeout: Option<u32>,

    /// Format of timestamps in log output
    #[arg(long, help_heading("Output options"), value_name("FORMAT"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_format: Option<TimeFormat>,
}
