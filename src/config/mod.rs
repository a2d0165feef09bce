mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./agora.toml",
        "./config.toml",
        "~/.config/agora/config.toml",
        "/etc/agora/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.cache.max_size_bytes == 0 {
        anyhow::bail!("cache.max_size_bytes must be greater than 0");
    }

    if config.cache.allowed_types.is_empty() {
        anyhow::bail!("cache.allowed_types cannot be empty");
    }

    if config.cache.max_pixels == 0 {
        anyhow::bail!("cache.max_pixels must be greater than 0");
    }

    if config.cache.timeout_secs == 0 {
        anyhow::bail!("cache.timeout_secs must be greater than 0");
    }

    if config.queue.workers == 0 {
        anyhow::bail!("queue.workers must be greater than 0");
    }

    if config.queue.capacity == 0 {
        anyhow::bail!("queue.capacity must be greater than 0");
    }

    for mime in &config.cache.allowed_types {
        if !mime.starts_with("image/") {
            tracing::warn!("cache.allowed_types contains a non-image type: {}", mime);
        }
    }

    Ok(())
}
