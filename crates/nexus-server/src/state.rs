//! Shared application state.

use crate::config::Config;
use crate::endpoints;
use nexus_core::Manager;
use std::sync::Arc;

pub struct AppState {
    pub manager: Arc<Manager>,
    pub config: Config,
}

impl AppState {
    /// Validate `config` and register one endpoint per configured path.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;

        let manager = Arc::new(Manager::new(config.manager_config()));
        for settings in &config.endpoints {
            manager.try_register(endpoints::build(settings))?;
        }

        Ok(Self { manager, config })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointSettings;

    #[test]
    fn test_registers_configured_endpoints() {
        let config = Config {
            endpoints: vec![EndpointSettings::new("/a"), EndpointSettings::new("/b")],
            ..Config::default()
        };
        let state = AppState::new(config).unwrap();
        assert_eq!(state.manager.paths(), vec!["/a".to_string(), "/b".to_string()]);
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let config = Config {
            endpoints: vec![],
            ..Config::default()
        };
        assert!(AppState::new(config).is_err());
    }
}
