use std::sync::OnceLock;

#[cfg(feature = "serde")] use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::threefry::Lowering;

/// Environment variable naming the default implementation.
pub const DEFAULT_IMPL_VAR: &str = "RAND_SPLIT_DEFAULT_IMPL";

/// Environment variable selecting the Threefry evaluation strategy.
pub const THREEFRY_LOWERING_VAR: &str = "RAND_SPLIT_THREEFRY_LOWERING";

/// Process-wide settings. Read once, then fixed for the life of the process.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Registry name or tag of the implementation returned by `default_impl`.
    pub default_impl: String,
    /// Strategy used when evaluating the Threefry hash.
    pub threefry_lowering: Lowering,
}

impl Default for Config {
    fn default() -> Self {
        Config { default_impl: "threefry2x32".to_string(), threefry_lowering: Lowering::Rolled }
    }
}

impl Config {
    /// Reads settings from the environment, keeping defaults for unset variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();
        if let Some(name) = lookup(DEFAULT_IMPL_VAR) {
            config.default_impl = name;
        }
        if let Some(lowering) = lookup(THREEFRY_LOWERING_VAR) {
            config.threefry_lowering = lowering.parse()?;
        }
        // Unknown names fail here rather than at the first call to default_impl.
        crate::prng::lookup(&config.default_impl)?;
        Ok(config)
    }
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Installs `config` as the process configuration. Fails if one is already in place.
pub fn init(config: Config) -> Result<()> {
    crate::prng::lookup(&config.default_impl)?;
    CONFIG.set(config).map_err(|_| Error::Config("configuration is already initialized".to_string()))?;
    debug!(config = ?get()?, "installed configuration");
    Ok(())
}

/// Returns the process configuration, loading it from the environment on first use.
pub fn get() -> Result<&'static Config> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }
    let config = Config::from_env()?;
    debug!(?config, "loaded configuration from environment");
    Ok(CONFIG.get_or_init(|| config))
}

#[cfg(test)] mod tests {
    use super::*;

    #[test] pub fn lookup_overrides_defaults() {
        let config = Config::from_lookup(|name| match name {
            DEFAULT_IMPL_VAR => Some("rbg".to_string()),
            THREEFRY_LOWERING_VAR => Some("unrolled".to_string()),
            _ => None,
        }).unwrap();
        assert_eq!(config.default_impl, "rbg");
        assert_eq!(config.threefry_lowering, Lowering::Unrolled);

        assert_eq!(Config::from_lookup(|_| None).unwrap(), Config::default());
    }

    #[test] pub fn bad_values_are_rejected() {
        let unknown = Config::from_lookup(|name| (name == DEFAULT_IMPL_VAR).then(|| "mersenne".to_string()));
        assert_eq!(unknown, Err(Error::UnknownImpl("mersenne".to_string())));
        let lowering = Config::from_lookup(|name| (name == THREEFRY_LOWERING_VAR).then(|| "fast".to_string()));
        assert!(matches!(lowering, Err(Error::Config(_))));
    }

    #[test] pub fn second_init_fails() {
        // Whatever ran first, the configuration is fixed after this.
        let _ = get();
        assert!(init(Config::default()).is_err());
    }
}
