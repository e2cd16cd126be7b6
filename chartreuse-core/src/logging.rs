//! Log setup for hook processes.
//!
//! Helm only keeps a hook's stderr, so every layer writes there.

use std::io;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub const LOG_FORMAT_ENV: &str = "CHARTREUSE_LOG_FORMAT";

/// Output shape of the log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line, for log collectors
    Json,
    Compact,
}

impl FromStr for LogFormat {
    type Err = crate::ChartreuseError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(crate::ChartreuseError::config(format!(
                "{} must be one of text, json, compact; got '{}'",
                LOG_FORMAT_ENV, other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Add file and line to each event
    pub include_location: bool,
    /// Emit an event when the hook span opens and closes
    pub include_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Text,
            include_location: false,
            include_spans: false,
        }
    }
}

impl LogConfig {
    /// Settings of a hook process
    ///
    /// `--verbose` wins over `RUST_LOG`; an unparseable `RUST_LOG` falls back to info.
    pub fn for_hook(
        verbose: bool,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> crate::Result<Self> {
        let level = if verbose {
            Level::DEBUG
        } else {
            lookup("RUST_LOG")
                .and_then(|level| Level::from_str(level.trim()).ok())
                .unwrap_or(Level::INFO)
        };
        let format = lookup(LOG_FORMAT_ENV).unwrap_or_default().parse()?;
        Ok(Self {
            level,
            format,
            include_location: verbose,
            include_spans: false,
        })
    }

    fn layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let span_events = if self.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let base = fmt::layer()
            .with_file(self.include_location)
            .with_line_number(self.include_location)
            .with_span_events(span_events)
            .with_writer(io::stderr);
        match self.format {
            LogFormat::Text => base.with_target(false).boxed(),
            LogFormat::Json => base.json().with_target(true).boxed(),
            LogFormat::Compact => base.compact().with_target(false).boxed(),
        }
    }

    fn filter(&self) -> EnvFilter {
        let level = self.level.as_str().to_lowercase();
        EnvFilter::new(format!(
            "warn,chartreuse_core={0},chartreuse_cluster={0},chartreuse={0}",
            level
        ))
    }
}

/// Install the global subscriber
pub fn init_logging(config: &LogConfig) -> crate::Result<()> {
    tracing_subscriber::registry()
        .with(config.layer())
        .with(config.filter())
        .try_init()
        .map_err(|e| {
            crate::ChartreuseError::config(format!("Failed to initialize logging: {}", e))
        })?;

    tracing::debug!(level = %config.level, format = ?config.format, "Logging initialized");
    Ok(())
}

/// Configure logging for a hook process from `RUST_LOG` and `CHARTREUSE_LOG_FORMAT`
pub fn init_hook_logging(verbose: bool) -> crate::Result<()> {
    init_logging(&LogConfig::for_hook(verbose, |name| std::env::var(name).ok())?)
}

/// Identifier of one hook invocation, attached to every log line of the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunId(String);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hook name, component and run id shared by the log lines of one run
#[derive(Debug, Clone)]
pub struct LogContext {
    run_id: RunId,
    hook: String,
    component: String,
}

impl LogContext {
    pub fn new(hook: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            run_id: RunId::new(),
            hook: hook.into(),
            component: component.into(),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn hook(&self) -> &str {
        &self.hook
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "hook",
            run_id = %self.run_id,
            hook = %self.hook,
            component = %self.component
        )
    }

    pub fn info(&self, message: &str) {
        self.span().in_scope(|| tracing::info!("{}", message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("Compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_hook_defaults() {
        let config = LogConfig::for_hook(false, lookup(&[])).unwrap();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, LogFormat::Text);
        assert!(!config.include_location);
    }

    #[test]
    fn test_verbose_wins_over_rust_log() {
        let config = LogConfig::for_hook(true, lookup(&[("RUST_LOG", "error")])).unwrap();
        assert_eq!(config.level, Level::DEBUG);
        assert!(config.include_location);
    }

    #[test]
    fn test_rust_log_and_format_from_environment() {
        let config = LogConfig::for_hook(
            false,
            lookup(&[("RUST_LOG", "warn"), (LOG_FORMAT_ENV, "json")]),
        )
        .unwrap();
        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_unparseable_rust_log_falls_back_to_info() {
        let config = LogConfig::for_hook(false, lookup(&[("RUST_LOG", "sqlx=trace")])).unwrap();
        assert_eq!(config.level, Level::INFO);
    }

    #[test]
    fn test_invalid_format_is_a_configuration_error() {
        let result = LogConfig::for_hook(false, lookup(&[(LOG_FORMAT_ENV, "xml")]));
        assert!(matches!(result, Err(crate::ChartreuseError::Configuration { .. })));
    }

    #[test]
    fn test_log_context() {
        let context = LogContext::new("post-deploy", "lifecycle");
        assert_eq!(context.hook(), "post-deploy");
        assert_eq!(context.component(), "lifecycle");
        assert_ne!(context.run_id(), LogContext::new("post-deploy", "lifecycle").run_id());
    }
}
