//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

/// Default generative backend endpoint
const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:11434";

/// Default model asked of the backend
const DEFAULT_MODEL: &str = "llama3.2";

/// How often the connectivity monitor re-probes the network
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Built-in site description handed to the backend when no context file
/// is configured. Mirrors what the front end currently serves.
const DEFAULT_SITE_CONTEXT: &str = "\
This site contains the following pages:
- Home: product showcase with links to documentation
- Products: catalog of 6 products priced from 79.99 to 199.99
- Chat: text chat with the assistant
";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Base URL of the generative backend
    pub backend_url: String,

    /// Model name sent in generate requests
    pub model: String,

    /// Connectivity poll interval
    pub poll_interval: Duration,

    /// Page/catalog description passed verbatim into every AI request
    pub site_context: String,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("voice-command");

        let socket_path = data_dir.join("daemon.sock");

        let backend_url = std::env::var("VOICE_BACKEND_URL")
            .unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string());

        let model = std::env::var("VOICE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let poll_interval = std::env::var("VOICE_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS));

        // Optional file with a description of the current page/catalog
        let site_context = match std::env::var("VOICE_SITE_CONTEXT") {
            Ok(path) => std::fs::read_to_string(&path)?,
            Err(_) => DEFAULT_SITE_CONTEXT.to_string(),
        };

        Ok(Self {
            socket_path,
            data_dir,
            backend_url,
            model,
            poll_interval,
            site_context,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_load() {
        let config = Config::load().unwrap();
        assert!(config
            .socket_path
            .to_string_lossy()
            .contains("voice-command"));
        assert!(!config.model.is_empty());
        assert_eq!(config.poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_default_site_context_mentions_products() {
        let config = Config::load().unwrap();
        assert!(config.site_context.contains("Products"));
    }
}
