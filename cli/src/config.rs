use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use platter_core::mealie::MealieConfig;
use platter_core::models::DateWindow;

use crate::ourgroceries::GroceryConfig;

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    pub settings: Settings,
}

/// User-tunable settings persisted as `config.json` in the data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub days_before: u32,
    pub days_after: u32,
    pub grocery_list_name: String,
    pub http_timeout_secs: u64,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            days_before: 7,
            days_after: 7,
            grocery_list_name: "Meal Planner".to_string(),
            http_timeout_secs: 10,
            log_level: "warn".to_string(),
        }
    }
}

/// Widest window either side of today that `config set` accepts (about ten years).
pub const MAX_WINDOW_DAYS: u32 = 3650;

pub const SETTING_KEYS: &[&str] = &[
    "days_before",
    "days_after",
    "grocery_list_name",
    "http_timeout_secs",
    "log_level",
];

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid settings file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)
            .with_context(|| format!("Failed to write settings: {}", path.display()))
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let int = |v: &str| -> Result<u64> {
            v.trim()
                .parse()
                .with_context(|| format!("'{key}' must be a non-negative integer, got '{v}'"))
        };
        let days = |v: &str| -> Result<u32> {
            let n = int(v)?;
            match u32::try_from(n) {
                Ok(n) if n <= MAX_WINDOW_DAYS => Ok(n),
                _ => bail!("'{key}' must be at most {MAX_WINDOW_DAYS}, got {n}"),
            }
        };
        match key {
            "days_before" => self.days_before = days(value)?,
            "days_after" => self.days_after = days(value)?,
            "http_timeout_secs" => {
                let secs = int(value)?;
                if secs == 0 {
                    bail!("http_timeout_secs must be at least 1");
                }
                self.http_timeout_secs = secs;
            }
            "grocery_list_name" => {
                if value.trim().is_empty() {
                    bail!("grocery_list_name must not be empty");
                }
                self.grocery_list_name = value.trim().to_string();
            }
            "log_level" => self.log_level = value.trim().to_lowercase(),
            _ => bail!(
                "Unknown setting '{key}'. Must be one of: {}",
                SETTING_KEYS.join(", ")
            ),
        }
        Ok(())
    }

    pub fn window_around(&self, today: NaiveDate) -> platter_core::Result<DateWindow> {
        DateWindow::around(today, self.days_before, self.days_after)
    }

    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "platter").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = std::env::var_os("PLATTER_DB")
            .map_or_else(|| data_dir.join("platter.db"), PathBuf::from);
        let settings = Settings::load(&data_dir.join("config.json"))?;

        Ok(Config {
            db_path,
            data_dir,
            settings,
        })
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    /// Mealie connection from `MEALIE_URL` / `MEALIE_API_TOKEN`.
    pub fn mealie(&self) -> Result<MealieConfig> {
        let url = require_env("MEALIE_URL")?;
        let token = require_env("MEALIE_API_TOKEN")?;
        Ok(MealieConfig::new(url, token).with_timeout(self.settings.http_timeout()))
    }

    /// `OurGroceries` credentials from `OG_USERNAME` / `OG_PASSWORD`.
    pub fn grocery(&self) -> Result<GroceryConfig> {
        Ok(GroceryConfig {
            username: require_env("OG_USERNAME")?,
            password: require_env("OG_PASSWORD")?,
            timeout: self.settings.http_timeout(),
        })
    }

    /// Load the API key from disk, or generate a new one.
    ///
    /// Returns `(key, newly_created)` where `newly_created` is true when a
    /// fresh key was just generated (first run).
    pub fn load_or_create_api_key(&self) -> Result<(String, bool)> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("api_key");

        if path.exists() {
            let key = std::fs::read_to_string(&path).context("Failed to read API key file")?;
            let key = key.trim().to_string();
            if !key.is_empty() {
                return Ok((key, false));
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let key = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &key).context("Failed to write API key file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set API key file permissions")?;
        }
        eprintln!("Generated new API key: {key}");
        eprintln!("Include in requests: Authorization: Bearer {key}");
        Ok((key, true))
    }
}

fn require_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => bail!("{name} is not set"),
    }
}
