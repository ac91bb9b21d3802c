// ABOUTME: Filter and output layers assembled by the subscriber setup
// ABOUTME: The filter is derived from LoggingConfig alone, after env overrides were folded in

use anyhow::{Context, Result};
use tracing::Subscriber;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{FileConfig, LoggingConfig};

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Render the config as a filter string, e.g. `info,statebridge_events=trace`.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut targets: Vec<_> = config.module_levels.iter().collect();
    targets.sort_by(|a, b| a.0.cmp(b.0));

    let mut directives = config.level.to_string();
    for (target, level) in targets {
        directives.push(',');
        directives.push_str(target);
        directives.push('=');
        directives.push_str(&level.to_string());
    }
    directives
}

pub fn create_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = filter_directives(config);
    EnvFilter::try_new(&directives).with_context(|| format!("Invalid log filter '{directives}'"))
}

/// Compact human output, or JSON lines with span close timings.
pub fn create_console_layer<S>(json: bool) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let base = fmt::layer().with_target(true);
    if json {
        base.json().with_span_events(FmtSpan::CLOSE).boxed()
    } else {
        base.compact().without_time().boxed()
    }
}

/// Plain-text layer over a daily-rotated file next to `config.path`.
pub fn create_file_layer<S>(config: &FileConfig) -> Result<BoxedLayer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let (directory, file_name) = match (config.path.parent(), config.path.file_name()) {
        (Some(directory), Some(file_name)) => (directory, file_name),
        _ => anyhow::bail!("Log file path '{}' has no file name", config.path.display()),
    };
    std::fs::create_dir_all(directory)
        .with_context(|| format!("Cannot create log directory {}", directory.display()))?;

    let (writer, guard) = non_blocking(rolling::daily(directory, file_name));
    // Flushing stops when the guard drops; the host keeps logging until exit
    std::mem::forget(guard);

    Ok(fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .boxed())
}
