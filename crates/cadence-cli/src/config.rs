use cadence_orchestrator::OrchestratorConfig;
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Contents of `cadence.toml`. Every table is optional.
#[derive(Debug, Default, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

/// Logging of workflow lifecycle events through the tracing subscriber.
#[derive(Debug, Deserialize)]
pub struct EventsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: default_capacity(),
        }
    }
}

fn default_capacity() -> usize {
    256
}

impl CadenceConfig {
    /// Read and validate a config file. A missing file yields the defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Failed to read config file '{}': {e}",
                    path.display()
                ))
            }
        };
        let config = Self::parse(&raw)?;
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.orchestrator.validate()?;
        if config.events.capacity == 0 {
            anyhow::bail!("events.capacity must be at least 1");
        }
        Ok(config)
    }
}
