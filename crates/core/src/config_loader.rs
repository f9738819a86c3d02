use std::path::Path;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::config::AppConfig;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration: built-in defaults, then the TOML file, then `STRANGLE_*` env vars.
    ///
    /// A missing TOML file is not an error; the defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be parsed or the merged config fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<AppConfig> {
        Self::extract(Self::base(path.as_ref()))
    }

    /// Loads configuration with a profile overlay (`Config.<profile>.toml` next to `path`).
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be parsed or the merged config fails validation.
    pub fn load_with_profile(path: impl AsRef<Path>, profile: &str) -> Result<AppConfig> {
        let path = path.as_ref();
        let overlay = path.with_file_name(format!("Config.{profile}.toml"));
        let figment = Self::base(path).merge(Toml::file(overlay));
        Self::extract(figment)
    }

    fn base(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("STRANGLE_").split("__"))
    }

    fn extract(figment: Figment) -> Result<AppConfig> {
        let config: AppConfig = figment.extract().context("Failed to parse configuration")?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}
