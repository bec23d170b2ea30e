//! Configuration loading.
//!
//! Settings are layered: built-in defaults, then an optional
//! `config/default.{toml,yaml,json}` file, then `TOPICAST_`-prefixed
//! environment variables (`TOPICAST_BROKER__QUEUE_CAPACITY=10`).

mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{BrokerSettings, LoggingSettings, ServerSettings, Settings};

/// Loads the configuration from the default file and environment variables
/// and merges it over the default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("TOPICAST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    let default = Settings::default();

    let settings = Settings {
        server: ServerSettings {
            host: partial
                .server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: partial
                .server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
        },
        broker: BrokerSettings {
            history_capacity: partial
                .broker
                .as_ref()
                .and_then(|b| b.history_capacity)
                .unwrap_or(default.broker.history_capacity),
            queue_capacity: partial
                .broker
                .as_ref()
                .and_then(|b| b.queue_capacity)
                .unwrap_or(default.broker.queue_capacity),
            connection_buffer: partial
                .broker
                .as_ref()
                .and_then(|b| b.connection_buffer)
                .unwrap_or(default.broker.connection_buffer),
        },
        logging: LoggingSettings {
            level: partial
                .logging
                .as_ref()
                .and_then(|l| l.level.clone())
                .unwrap_or(default.logging.level),
        },
    };

    validate(&settings)?;
    Ok(settings)
}

/// Bounded channels cannot be created with zero capacity.
fn validate(settings: &Settings) -> Result<(), ConfigError> {
    let broker = &settings.broker;
    for (key, value) in [
        ("broker.history_capacity", broker.history_capacity),
        ("broker.queue_capacity", broker.queue_capacity),
        ("broker.connection_buffer", broker.connection_buffer),
    ] {
        if value == 0 {
            return Err(ConfigError::Message(format!("{key} must be greater than zero")));
        }
    }
    Ok(())
}
