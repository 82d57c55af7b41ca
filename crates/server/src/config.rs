use std::fs;

use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "bind_addr")]
    pub server_bind: String,
    pub favorites_path: String,
    pub feedback_tick_ms: u64,
    pub time_scale: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:3000".into(),
            favorites_path: "./data/favorite_poses.txt".into(),
            feedback_tick_ms: 100,
            time_scale: 1.0,
        }
    }
}

/// Defaults, overridden by `server.toml` (any subset of keys), overridden
/// by environment variables.
pub fn load_settings() -> Settings {
    let mut settings = match fs::read_to_string("server.toml") {
        Ok(raw) => parse_settings(&raw).unwrap_or_else(|error| {
            warn!(%error, "server.toml is malformed, using defaults");
            Settings::default()
        }),
        Err(_) => Settings::default(),
    };

    if let Ok(v) = std::env::var("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Ok(v) = std::env::var("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Ok(v) = std::env::var("FAVORITES_PATH") {
        settings.favorites_path = v;
    }
    if let Ok(v) = std::env::var("APP__FAVORITES_PATH") {
        settings.favorites_path = v;
    }

    if let Ok(v) = std::env::var("APP__FEEDBACK_TICK_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.feedback_tick_ms = parsed;
        }
    }

    if let Ok(v) = std::env::var("APP__TIME_SCALE") {
        if let Ok(parsed) = v.parse::<f64>() {
            settings.time_scale = parsed;
        }
    }

    if !(settings.time_scale.is_finite() && settings.time_scale > 0.0) {
        warn!(
            time_scale = settings.time_scale,
            "time_scale must be finite and positive, falling back to 1.0"
        );
        settings.time_scale = 1.0;
    }

    settings
}

fn parse_settings(raw: &str) -> Result<Settings, toml::de::Error> {
    toml::from_str(raw)
}
