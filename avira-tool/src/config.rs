use std::path::PathBuf;

use avira_core::{Identity, UserProfile};
use serde::Deserialize;

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_STORE_URL: &str = "http://localhost:3000";
const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    pub backend_url: Option<String>,
    pub store_url: Option<String>,
    pub session_token: Option<String>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub log_level: Option<String>,
}

/// Values given on the command line.
#[derive(Debug, Default)]
pub struct Overrides {
    pub backend_url: Option<String>,
    pub store_url: Option<String>,
}

/// Effective settings after config file, environment and command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub backend_url: String,
    pub store_url: String,
    pub session_token: Option<String>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub log_level: String,
}

fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("avira").join("config.toml"))
}

pub fn load_config() -> Config {
    let Some(path) = config_path() else {
        return Config::default();
    };

    let Ok(content) = std::fs::read_to_string(path) else {
        return Config::default();
    };

    toml::from_str(&content).unwrap_or_default()
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Settings {
    pub fn resolve(overrides: Overrides) -> Self {
        Self::resolve_with(load_config(), overrides, env_var)
    }

    /// Command line first, then environment, then config file.
    fn resolve_with(config: Config, overrides: Overrides, env: impl Fn(&str) -> Option<String>) -> Self {
        let backend_url = non_empty(overrides.backend_url)
            .or_else(|| non_empty(env("AVIRA_BACKEND_URL")))
            .or_else(|| non_empty(config.backend_url))
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());

        let store_url = non_empty(overrides.store_url)
            .or_else(|| non_empty(env("AVIRA_STORE_URL")))
            .or_else(|| non_empty(config.store_url))
            .unwrap_or_else(|| DEFAULT_STORE_URL.to_string());

        let session_token = non_empty(env("AVIRA_SESSION_TOKEN")).or_else(|| non_empty(config.session_token));

        Self {
            backend_url,
            store_url,
            session_token,
            user_name: non_empty(config.user_name),
            user_email: non_empty(config.user_email),
            log_level: non_empty(config.log_level).unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        }
    }

    /// Who the user is. Offline sessions only need an e-mail.
    pub fn identity(&self, offline: bool) -> Identity {
        let signed_in = self.session_token.is_some() || (offline && self.user_email.is_some());
        if !signed_in {
            return Identity::Anonymous;
        }

        Identity::Authenticated(UserProfile {
            email: self.user_email.clone().unwrap_or_default(),
            name: self.user_name.clone(),
            avatar_url: None,
        })
    }
}
