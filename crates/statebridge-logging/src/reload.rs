// ABOUTME: Runtime log level changes for an already installed subscriber
// ABOUTME: Lets the host raise bridge verbosity while diagnosing a desync

use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{EnvFilter, Registry, reload};

use crate::config::LoggingConfig;
use crate::layers::create_env_filter;

type FilterHandle = reload::Handle<EnvFilter, Registry>;

#[derive(Clone)]
pub struct LoggingReloadHandle {
    filter: FilterHandle,
    config: Arc<RwLock<LoggingConfig>>,
}

impl LoggingReloadHandle {
    pub fn new(filter: FilterHandle, config: LoggingConfig) -> Self {
        Self {
            filter,
            config: Arc::new(RwLock::new(config)),
        }
    }

    pub fn update_log_level(&self, level: Level) -> Result<()> {
        self.modify(|config| config.level = level.into())?;
        tracing::info!(%level, "Log level changed");
        Ok(())
    }

    /// Override one target, e.g. `statebridge_events`, leaving the rest alone.
    pub fn update_module_level(&self, module: &str, level: Level) -> Result<()> {
        self.modify(|config| {
            config.module_levels.insert(module.to_owned(), level.into());
        })?;
        tracing::info!(module, %level, "Target log level changed");
        Ok(())
    }

    /// Re-read levels from the environment. Outputs stay as installed, since
    /// layers cannot be swapped after init.
    pub fn reload_from_env(&self) -> Result<()> {
        let fresh = LoggingConfig::from_env().context("Environment log settings are invalid")?;
        self.modify(|config| {
            config.level = fresh.level;
            config.module_levels = fresh.module_levels;
        })?;
        tracing::info!(
            filter = %crate::layers::filter_directives(&self.current_config()),
            "Log levels reloaded from environment"
        );
        Ok(())
    }

    pub fn current_config(&self) -> LoggingConfig {
        self.config.read().clone()
    }

    /// Apply `change` to a copy and commit it only once the filter accepted it.
    fn modify(&self, change: impl FnOnce(&mut LoggingConfig)) -> Result<()> {
        let mut config = self.config.write();
        let mut next = config.clone();
        change(&mut next);
        self.filter
            .reload(create_env_filter(&next)?)
            .context("Failed to swap the log filter")?;
        *config = next;
        Ok(())
    }
}
