use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use error::ConfigError;
pub use settings::{
    AccountSettings, Config, EngineSettings, EstimationSettings, MarketSettings,
    OrderBookSettings, RiskSettings,
};

/// Environment variables with this prefix override file values,
/// e.g. `ORDERFLOW__ENGINE__TAKER_FEE_PCT=0.001`.
pub const ENV_PREFIX: &str = "ORDERFLOW";

/// Command-line flags shared by every binary that needs a configuration file.
#[cfg(feature = "clap")]
#[derive(Debug, Clone, clap::Args)]
pub struct ConfigArgs {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    pub config: std::path::PathBuf,
}

/// Loads the application configuration from the `config.toml` file.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from("config.toml")
}

/// Loads configuration from `path`, layered with `ORDERFLOW__*` environment overrides.
///
/// A missing file is not an error: every section falls back to its defaults.
/// The result is validated before it is returned.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::warn!(path = %path.display(), "Configuration file not found, using defaults.");
    }

    let builder = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    // Attempt to deserialize the entire configuration into our `Config` struct
    let config = builder.try_deserialize::<Config>()?;
    config.validate()?;

    Ok(config)
}
