use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

use crate::config::AppConfig;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads application configuration by merging the TOML file with
    /// `DAYTRADER_`-prefixed environment variables.
    ///
    /// # Errors
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load(path: &str) -> Result<AppConfig> {
        let config: AppConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("DAYTRADER_").split("__"))
            .extract()?;

        Ok(config)
    }
}
