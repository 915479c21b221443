//! Persisted user settings.
//!
//! Stored as a single JSON object, loaded at startup and rewritten wholesale
//! on save. Presentation keys (`theme`, `font_size`, background) are kept
//! for compatibility with existing settings files; the terminal client does
//! not use them.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_key: String,
    pub system_prompt: String,
    pub theme: String,
    pub font_size: String,
    pub user_name: String,
    pub ai_name: String,
    pub background_opacity: f64,
    pub background_image_path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            system_prompt: String::new(),
            theme: "dark".to_string(),
            font_size: "medium".to_string(),
            user_name: "User".to_string(),
            ai_name: "Claude".to_string(),
            background_opacity: 0.3,
            background_image_path: None,
        }
    }
}

pub const KEYS: &[&str] = &[
    "api_key",
    "system_prompt",
    "theme",
    "font_size",
    "user_name",
    "ai_name",
    "background_opacity",
    "background_image_path",
];

impl Settings {
    /// Load settings from `path`. A missing file gives defaults; an
    /// unreadable or malformed one is logged and also gives defaults.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        let parsed = std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|s| serde_json::from_str::<Settings>(&s).map_err(anyhow::Error::from));
        match parsed {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load settings, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write settings file: {}", path.display()))?;
        Ok(())
    }

    /// Set one key by name. Blank names fall back to their defaults, and an
    /// empty background path clears it.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "api_key" => self.api_key = value.trim().to_string(),
            "system_prompt" => self.system_prompt = value.to_string(),
            "theme" => self.theme = value.to_string(),
            "font_size" => self.font_size = value.to_string(),
            "user_name" => self.user_name = non_blank_or(value, "User"),
            "ai_name" => self.ai_name = non_blank_or(value, "Claude"),
            "background_opacity" => {
                let v: f64 = value
                    .trim()
                    .parse()
                    .with_context(|| format!("background_opacity must be a number, got '{}'", value))?;
                if !(0.0..=1.0).contains(&v) {
                    bail!("background_opacity must be in [0.0, 1.0]");
                }
                self.background_opacity = v;
            }
            "background_image_path" => {
                self.background_image_path = if value.trim().is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            other => bail!(
                "Unknown settings key: '{}'. Must be one of: {}",
                other,
                KEYS.join(", ")
            ),
        }
        Ok(())
    }

    /// The API key to use: the environment override when set, else the
    /// persisted key. `None` when neither is present.
    pub fn effective_api_key(&self, env_override: Option<String>) -> Option<String> {
        env_override
            .filter(|k| !k.trim().is_empty())
            .or_else(|| Some(self.api_key.clone()).filter(|k| !k.trim().is_empty()))
    }

    /// Copy with the API key masked for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.api_key.is_empty() {
            let tail: String = copy
                .api_key
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            copy.api_key = format!("****{}", tail);
        }
        copy
    }
}

fn non_blank_or(value: &str, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}
