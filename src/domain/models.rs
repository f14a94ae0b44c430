use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SolvedCounts {
    pub all: u32,
    pub easy: u32,
    pub medium: u32,
    pub hard: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UserStats {
    pub ranking: Option<u32>,
    pub solved: SolvedCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StreakInfo {
    pub current_streak: u32,
    pub total_active_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpcomingContest {
    pub title: String,
    pub title_slug: String,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ContestInfo {
    pub rating: Option<f64>,
    pub attended_count: u32,
    pub global_ranking: Option<u32>,
    pub upcoming: Vec<UpcomingContest>,
}

/// Everything the widget and reminders need about one user, as last fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileSnapshot {
    pub username: String,
    pub stats: UserStats,
    pub streak: StreakInfo,
    pub contest: ContestInfo,
    /// Raw `submissionCalendar` JSON text exactly as the remote returned it.
    pub submission_calendar: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl ProfileSnapshot {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.username, "profile.username")?;
        for contest in &self.contest.upcoming {
            validate_non_empty(&contest.title_slug, "profile.contest.upcoming[].title_slug")?;
            if contest.duration_seconds < 0 {
                return Err("profile.contest.upcoming[].duration_seconds must be >= 0".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRecord {
    pub username: String,
    pub payload: String,
    pub last_updated: DateTime<Utc>,
}

impl CachedRecord {
    pub fn from_snapshot(snapshot: &ProfileSnapshot) -> Result<Self, serde_json::Error> {
        Ok(Self {
            username: snapshot.username.clone(),
            payload: serde_json::to_string(snapshot)?,
            last_updated: snapshot.fetched_at,
        })
    }

    pub fn decode(&self) -> Result<ProfileSnapshot, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ReminderPhase {
    Pre,
    Start,
    Summary,
}

impl ReminderPhase {
    pub const ALL: [ReminderPhase; 3] = [Self::Pre, Self::Start, Self::Summary];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Start => "start",
            Self::Summary => "summary",
        }
    }
}

impl fmt::Display for ReminderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReminderPhase {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pre" => Ok(Self::Pre),
            "start" => Ok(Self::Start),
            "summary" => Ok(Self::Summary),
            other => Err(format!("unknown reminder phase '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledReminder {
    pub subject_id: String,
    pub phase: ReminderPhase,
    pub fire_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
}

impl ScheduledReminder {
    /// Logical scheduler name; one pending job per `(subject, phase)`.
    pub fn job_name(&self) -> String {
        format!("reminder:{}:{}", self.subject_id, self.phase)
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.subject_id, "reminder.subject_id")?;
        validate_non_empty(&self.title, "reminder.title")
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Notification {
    pub key: String,
    pub title: String,
    pub body: String,
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
