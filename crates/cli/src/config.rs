//! CLI configuration utilities

use anyhow::{Context, Result};
use jobtrack_session::SessionConfig;
use std::path::{Path, PathBuf};

/// Prefix for environment overrides, e.g. `JOBTRACK__API_BASE_URL`
pub const ENV_PREFIX: &str = "JOBTRACK";

/// Name of the configuration file inside the data directory
pub const CONFIG_FILE: &str = "config.toml";

/// Name of the persisted session inside the data directory
pub const SESSION_FILE: &str = "session.json";

/// Determine the data directory with default fallback
pub fn resolve_data_dir(data_dir: Option<PathBuf>) -> PathBuf {
    data_dir.unwrap_or_else(|| {
        // Check environment variable first, then fall back to system data dir
        if let Ok(dir) = std::env::var("JOBTRACK_DATA_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("jobtrack")
        }
    })
}

/// Load session configuration: defaults, then the TOML file, then
/// `JOBTRACK__*` environment variables.
///
/// The prefix is joined with a double underscore too, so a single
/// underscore (`JOBTRACK_LOGIN_ROUTE`) is not picked up.
/// An explicitly given file must exist; the default one is optional.
pub fn load_config(data_dir: &Path, path: Option<&Path>) -> Result<SessionConfig> {
    load_layers(data_dir, path, environment())
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX).separator("__")
}

fn load_layers(
    data_dir: &Path,
    path: Option<&Path>,
    environment: config::Environment,
) -> Result<SessionConfig> {
    let defaults = SessionConfig::default();

    let file = match path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::from(data_dir.join(CONFIG_FILE)).required(false),
    };

    let settings = config::Config::builder()
        .set_default("api_base_url", defaults.api_base_url)?
        .set_default("poll_interval_secs", defaults.poll_interval_secs)?
        .set_default("request_timeout_secs", defaults.request_timeout_secs)?
        .set_default("login_route", defaults.login_route)?
        .set_default("user_agent", defaults.user_agent)?
        .add_source(file)
        .add_source(environment)
        .build()
        .context("Failed to load configuration")?;

    Ok(settings.try_deserialize()?)
}

/// Save configuration to a TOML file
pub fn save_config<P: AsRef<Path>>(config: &SessionConfig, path: P) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Generate a default configuration file
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
    save_config(&SessionConfig::default(), path)
}
