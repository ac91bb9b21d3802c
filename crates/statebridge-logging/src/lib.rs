// ABOUTME: Public API for statebridge logging built on tokio-tracing
// ABOUTME: Centralizes subscriber setup, runtime level reloads and latency sampling

pub mod config;
pub mod layers;
pub mod performance;
pub mod reload;
pub mod subscriber;


// Bridge crates log through these so they share one tracing version
pub use tracing::{Level, Span, debug, error, info, info_span, instrument, span, trace, warn};

pub use config::LoggingConfig;
pub use performance::{LatencyStats, PerfTimer, PerformanceMonitor};
pub use reload::LoggingReloadHandle;
pub use subscriber::{init_subscriber, init_subscriber_with_reload};

use anyhow::{Result, anyhow};
use std::sync::OnceLock;

static RELOAD: OnceLock<LoggingReloadHandle> = OnceLock::new();

/// Install logging from defaults plus `STATEBRIDGE_LOG*` / `RUST_LOG`.
pub fn init_logging() -> Result<()> {
    init_subscriber(LoggingConfig::from_env()?)
}

pub fn init_logging_with_config(config: LoggingConfig) -> Result<()> {
    init_subscriber(config)
}

/// Install logging and remember the reload handle for the free functions below.
pub fn init_logging_with_reload(config: LoggingConfig) -> Result<LoggingReloadHandle> {
    let handle = init_subscriber_with_reload(config)?;
    // A second install already failed in try_init, so the cell is empty here
    let _ = RELOAD.set(handle.clone());
    Ok(handle)
}

fn installed() -> Result<&'static LoggingReloadHandle> {
    RELOAD
        .get()
        .ok_or_else(|| anyhow!("Logging was not installed with init_logging_with_reload"))
}

pub fn update_log_level(level: Level) -> Result<()> {
    installed()?.update_log_level(level)
}

pub fn update_module_level(module: &str, level: Level) -> Result<()> {
    installed()?.update_module_level(module, level)
}

pub fn reload_from_env() -> Result<()> {
    installed()?.reload_from_env()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;
    use tracing_subscriber::prelude::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_free_functions_need_reload_install() {
        // No test in this crate installs the global subscriber
        let error = update_module_level("statebridge_core", Level::DEBUG).unwrap_err();
        assert!(error.to_string().contains("init_logging_with_reload"));
        assert!(reload_from_env().is_err());
    }

    #[test]
    fn test_json_console_layer_keeps_bridge_fields() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(captured.clone()),
        );

        tracing::subscriber::with_default(subscriber, || {
            info!(topic = "session:update", payloads = 2, "Batch flushed");
            warn!(owner = "sidebar", "Subscriber delivery failed");
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["fields"]["topic"], "session:update");
        assert_eq!(lines[0]["fields"]["payloads"], 2);
        assert_eq!(lines[1]["level"], "WARN");
        assert_eq!(lines[1]["fields"]["owner"], "sidebar");
    }
}
