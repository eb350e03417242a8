//! Logging configuration and initialization.
//!
//! Presets (production, verbose, debug, trace, quiet) pick per-target levels
//! for the `nexus::*` targets. `--log target=level` overrides a single target,
//! and a set `RUST_LOG` replaces the whole filter. Stdout gets text or JSON;
//! with a log directory configured, JSON records also go to daily-rotated
//! files there.

use anyhow::{bail, Context};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: '{}'. Use 'text' or 'json'.", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogPreset {
    /// Lifecycle events and failures only
    #[default]
    Production,
    /// Adds per-connection detail
    Verbose,
    /// Adds dispatch and inbound traffic, minus control frames
    Debug,
    /// Everything
    Trace,
    /// Warnings and errors only
    Quiet,
}

/// File name prefix of rotated logs: `nexus.YYYY-MM-DD.log`.
const LOG_FILE_PREFIX: &str = "nexus";

/// Daily-rotated JSON log files.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogFileSettings {
    pub dir: PathBuf,
    /// Rotated files kept; older ones are deleted on rollover.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_max_files() -> usize {
    30
}

impl LogFileSettings {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_files: default_max_files(),
        }
    }

    pub fn appender(&self) -> anyhow::Result<RollingFileAppender> {
        if self.max_files == 0 {
            bail!("log_file.max_files must be at least 1");
        }
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix("log")
            .max_log_files(self.max_files)
            .build(&self.dir)
            .with_context(|| format!("cannot open log directory {}", self.dir.display()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub preset: LogPreset,
    /// Full target name -> level, e.g. "nexus::dispatch" -> DEBUG
    pub overrides: HashMap<String, Level>,
    pub format: LogFormat,
    pub file: Option<LogFileSettings>,
}

impl LogConfig {
    /// Build from CLI flags. The most restrictive flag wins: quiet, then
    /// trace, debug, verbose.
    pub fn from_cli(
        verbose: bool,
        debug: bool,
        trace: bool,
        quiet: bool,
        log_overrides: Vec<String>,
        format: LogFormat,
    ) -> Self {
        let preset = if quiet {
            LogPreset::Quiet
        } else if trace {
            LogPreset::Trace
        } else if debug {
            LogPreset::Debug
        } else if verbose {
            LogPreset::Verbose
        } else {
            LogPreset::Production
        };

        // "dispatch=debug" or "endpoint=info,ws::ping=trace"
        let mut overrides = HashMap::new();
        for override_str in log_overrides {
            for part in override_str.split(',') {
                let Some((target, level_str)) = part.split_once('=') else {
                    continue;
                };
                let target = target.trim();

                let full_target = if target.starts_with("nexus::") || target == "tower_http" {
                    target.to_string()
                } else {
                    format!("nexus::{}", target)
                };

                if let Ok(level) = level_str.trim().parse::<Level>() {
                    overrides.insert(full_target, level);
                }
            }
        }

        Self {
            preset,
            overrides,
            format,
            file: None,
        }
    }

    pub fn build_filter(&self) -> EnvFilter {
        if let Ok(env_filter) = EnvFilter::try_from_default_env() {
            return env_filter;
        }

        let mut directives: Vec<String> = match self.preset {
            LogPreset::Production => vec![
                "nexus::startup=info".into(),
                "nexus::registry=info".into(),
                "nexus::endpoint=info".into(),
                "nexus::api=info".into(),
                "nexus::events=warn".into(),
                "nexus::dispatch=warn".into(),
                "nexus::inbound=warn".into(),
                "nexus::ws::ping=off".into(),
                "tower_http=warn".into(),
            ],
            LogPreset::Verbose => vec![
                "nexus=info".into(),
                "nexus::ws::ping=off".into(),
                "tower_http=info".into(),
            ],
            LogPreset::Debug => vec![
                "nexus=debug".into(),
                "nexus::ws::ping=off".into(),
                "tower_http=debug".into(),
            ],
            LogPreset::Trace => vec!["nexus=trace".into(), "tower_http=trace".into()],
            LogPreset::Quiet => vec!["nexus=warn".into(), "tower_http=error".into()],
        };

        for (target, level) in &self.overrides {
            directives.push(format!("{}={}", target, level.to_string().to_lowercase()));
        }

        let filter_str = directives.join(",");
        EnvFilter::try_new(&filter_str).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber. The returned guard flushes the log file
/// writer when dropped, so keep it alive for the life of the process.
pub fn init(config: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match &config.file {
        Some(settings) => {
            let (writer, guard) = tracing_appender::non_blocking(settings.appender()?);
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(config.build_filter())
        .with(file_layer);

    match config.format {
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?,
    }

    Ok(guard)
}
