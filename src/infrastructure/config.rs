use crate::domain::heatmap_grid::{GridMode, MAX_TRAILING_WEEKS};
use crate::domain::layout::LayoutRequest;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::profile_client::{FetchTimeouts, DEFAULT_PROFILE_ENDPOINT};
use chrono::{NaiveDate, NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_JSON: &str = "app.json";
const SCHEMA_VERSION: u64 = 1;
const USERNAME_ENV: &str = "STREAKGRID_USERNAME";
const MIN_TIMEOUT_SECONDS: u64 = 10;
const MAX_TIMEOUT_SECONDS: u64 = 20;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HeatmapModeSetting {
    Month,
    Year,
    Trailing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CanvasConfig {
    pub width: f64,
    pub height: f64,
    pub spacing: f64,
    pub min_cell_size: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    pub target: Option<String>,
    pub default_target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemindersConfig {
    pub contest_lead_minutes: u32,
    pub streak_nudge_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub schema: u64,
    #[serde(default)]
    pub username: Option<String>,
    pub timezone: String,
    pub week_start: String,
    pub heatmap_mode: HeatmapModeSetting,
    pub trailing_weeks: u32,
    pub refresh_interval_minutes: u64,
    pub connect_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
    pub endpoint: String,
    pub canvas: CanvasConfig,
    pub output: OutputConfig,
    pub reminders: RemindersConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema: SCHEMA_VERSION,
            username: None,
            timezone: "UTC".to_string(),
            week_start: "Sunday".to_string(),
            heatmap_mode: HeatmapModeSetting::Month,
            trailing_weeks: 26,
            refresh_interval_minutes: 240,
            connect_timeout_seconds: 10,
            request_timeout_seconds: 15,
            endpoint: DEFAULT_PROFILE_ENDPOINT.to_string(),
            canvas: CanvasConfig {
                width: 1080.0,
                height: 540.0,
                spacing: 6.0,
                min_cell_size: 10.0,
            },
            output: OutputConfig {
                target: None,
                default_target: "output/heatmap.json".to_string(),
            },
            reminders: RemindersConfig {
                contest_lead_minutes: 15,
                streak_nudge_time: "20:00".to_string(),
            },
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), InfraError> {
        self.time_zone()?;
        self.week_start()?;
        self.streak_nudge_time()?;
        if self.refresh_interval_minutes == 0 {
            return Err(InfraError::InvalidConfig(
                "refreshIntervalMinutes must be > 0".to_string(),
            ));
        }
        for (field, value) in [
            ("connectTimeoutSeconds", self.connect_timeout_seconds),
            ("requestTimeoutSeconds", self.request_timeout_seconds),
        ] {
            if !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&value) {
                return Err(InfraError::InvalidConfig(format!(
                    "{field} must be between {MIN_TIMEOUT_SECONDS} and {MAX_TIMEOUT_SECONDS}"
                )));
            }
        }
        if !(1..=MAX_TRAILING_WEEKS).contains(&self.trailing_weeks) {
            return Err(InfraError::InvalidConfig(format!(
                "trailingWeeks must be between 1 and {MAX_TRAILING_WEEKS}"
            )));
        }
        if self.canvas.width <= 0.0 || self.canvas.height <= 0.0 {
            return Err(InfraError::InvalidConfig(
                "canvas width and height must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn time_zone(&self) -> Result<Tz, InfraError> {
        self.timezone.trim().parse::<Tz>().map_err(|error| {
            InfraError::InvalidConfig(format!("invalid timezone '{}': {error}", self.timezone))
        })
    }

    pub fn week_start(&self) -> Result<Weekday, InfraError> {
        self.week_start.trim().parse::<Weekday>().map_err(|_| {
            InfraError::InvalidConfig(format!("invalid weekStart '{}'", self.week_start))
        })
    }

    pub fn streak_nudge_time(&self) -> Result<NaiveTime, InfraError> {
        NaiveTime::parse_from_str(self.reminders.streak_nudge_time.trim(), "%H:%M").map_err(|_| {
            InfraError::InvalidConfig(format!(
                "reminders.streakNudgeTime must be HH:MM, got '{}'",
                self.reminders.streak_nudge_time
            ))
        })
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_minutes.saturating_mul(60))
    }

    pub fn fetch_timeouts(&self) -> FetchTimeouts {
        FetchTimeouts {
            connect: Duration::from_secs(self.connect_timeout_seconds),
            request: Duration::from_secs(self.request_timeout_seconds),
        }
    }

    pub fn grid_mode(&self, today: NaiveDate) -> GridMode {
        match self.heatmap_mode {
            HeatmapModeSetting::Month => GridMode::Month,
            HeatmapModeSetting::Year => GridMode::Year {
                year: chrono::Datelike::year(&today),
            },
            HeatmapModeSetting::Trailing => GridMode::Trailing {
                weeks: self.trailing_weeks.clamp(1, MAX_TRAILING_WEEKS),
            },
        }
    }

    pub fn layout_request(&self, weeks: usize) -> LayoutRequest {
        LayoutRequest {
            available_width: self.canvas.width,
            available_height: self.canvas.height,
            weeks,
            spacing: self.canvas.spacing,
            min_cell_size: self.canvas.min_cell_size,
        }
    }

    /// Relative output paths are resolved against the workspace root.
    pub fn output_paths(&self, workspace_root: &Path) -> (Option<PathBuf>, PathBuf) {
        let resolve = |raw: &str| workspace_root.join(raw.trim());
        let target = self
            .output
            .target
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .map(resolve);
        (target, resolve(&self.output.default_target))
    }
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&AppConfig::default())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SCHEMA_VERSION {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    load_app_config_with_lookup(config_dir, |key| std::env::var(key).ok())
}

pub fn load_app_config_with_lookup<F>(config_dir: &Path, lookup: F) -> Result<AppConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = read_config(&config_dir.join(APP_JSON))?;
    let mut config: AppConfig = serde_json::from_value(raw)?;
    if let Some(username) = lookup(USERNAME_ENV)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    {
        config.username = Some(username);
    }
    config.validate()?;
    Ok(config)
}
