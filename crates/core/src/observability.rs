use fork_pool_config::ForkPoolConfig;
use std::sync::{Arc, RwLock};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Layer, Registry};

/// A sharable reference to the observability stack.
///
/// Logs are always written to stderr: stdout of a supervised worker carries the coordinator
/// protocol.
#[derive(Debug, Clone)]
pub struct Observability {
    crates: Vec<String>,
    reload_handle: reload::Handle<EnvFilter, Registry>,
    last_directives: Arc<RwLock<String>>,
}

impl Observability {
    /// Installs the global subscriber. `crates` are the targets `log_level` applies to; every
    /// other target is left at its `RUST_LOG` directive or silent.
    pub fn init(crates: Vec<String>, log_level: LevelFilter, json: bool) -> anyhow::Result<Self> {
        let directives = Self::directives(&crates, log_level);
        let filter = Self::parse_filter(&directives)?;
        let (filter, reload_handle) = reload::Layer::new(filter);

        let fmt_layer = if json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .boxed()
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()?;

        Ok(Self {
            crates,
            reload_handle,
            last_directives: Arc::new(RwLock::new(directives)),
        })
    }

    pub fn from_config(config: &ForkPoolConfig) -> anyhow::Result<Self> {
        Self::init(
            vec!["fork_pool_core".to_string(), "fork_pool_config".to_string()],
            config.log_level.into(),
            config.log_json,
        )
    }

    /// Changes the level of every tracked crate at runtime.
    pub fn set_log_level(&self, level: LevelFilter) -> anyhow::Result<()> {
        self.set_logging(Self::directives(&self.crates, level))
    }

    /// Replaces the whole filter with `directives` (`RUST_LOG` syntax).
    pub fn set_logging(&self, directives: impl Into<String>) -> anyhow::Result<()> {
        let directives = directives.into();
        let filter = Self::parse_filter(&directives)?;
        self.reload_handle.reload(filter)?;
        *self
            .last_directives
            .write()
            .expect("Observability lock is poisoned") = directives;
        Ok(())
    }

    pub fn directives_in_use(&self) -> String {
        self.last_directives
            .read()
            .expect("Observability lock is poisoned")
            .clone()
    }

    fn directives(crates: &[String], level: LevelFilter) -> String {
        let level = level.to_string().to_lowercase();
        crates
            .iter()
            .map(|krate| format!("{krate}={level}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// `RUST_LOG` directives take precedence over the ones derived from the configured level.
    fn parse_filter(directives: &str) -> anyhow::Result<EnvFilter> {
        let mut filter = EnvFilter::builder().parse(directives)?;
        if let Ok(env) = std::env::var(EnvFilter::DEFAULT_ENV) {
            for directive in env.split(',').filter(|d| !d.trim().is_empty()) {
                filter = filter.add_directive(directive.parse()?);
            }
        }
        Ok(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::Observability;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn level_applies_to_every_tracked_crate() {
        let crates = vec!["fork_pool_core".to_string(), "fork_pool_config".to_string()];
        assert_eq!(
            Observability::directives(&crates, LevelFilter::DEBUG),
            "fork_pool_core=debug,fork_pool_config=debug"
        );
    }

    #[test]
    fn invalid_directive_is_rejected() {
        assert!(Observability::parse_filter("fork_pool_core=loud").is_err());
    }
}
