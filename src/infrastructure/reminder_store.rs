use crate::domain::models::{ReminderPhase, ScheduledReminder};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_connection;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait ReminderStore: Send + Sync {
    /// One row per `(subject_id, phase)`; a second upsert replaces the first.
    fn upsert(&self, reminder: &ScheduledReminder) -> Result<(), InfraError>;
    fn list_pending(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledReminder>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteReminderStore {
    db_path: PathBuf,
}

impl SqliteReminderStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_connection(&self.db_path)
    }
}

impl ReminderStore for SqliteReminderStore {
    fn upsert(&self, reminder: &ScheduledReminder) -> Result<(), InfraError> {
        reminder.validate().map_err(InfraError::InvalidConfig)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO scheduled_reminders (subject_id, phase, fire_at, title, body)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(subject_id, phase) DO UPDATE SET
               fire_at = excluded.fire_at,
               title = excluded.title,
               body = excluded.body",
            params![
                reminder.subject_id,
                reminder.phase.as_str(),
                reminder.fire_at.to_rfc3339(),
                reminder.title,
                reminder.body
            ],
        )?;
        Ok(())
    }

    fn list_pending(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledReminder>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT subject_id, phase, fire_at, title, body FROM scheduled_reminders",
        )?;
        let rows = statement.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut pending = Vec::new();
        for row in rows {
            let (subject_id, phase_raw, fire_at_raw, title, body) = row?;
            let phase = phase_raw.parse::<ReminderPhase>().map_err(InfraError::InvalidConfig)?;
            let fire_at = DateTime::parse_from_rfc3339(&fire_at_raw)
                .map_err(|error| {
                    InfraError::InvalidConfig(format!(
                        "invalid scheduled_reminders.fire_at '{}': {error}",
                        fire_at_raw
                    ))
                })?
                .with_timezone(&Utc);
            if fire_at <= now {
                continue;
            }
            pending.push(ScheduledReminder {
                subject_id,
                phase,
                fire_at,
                title,
                body,
            });
        }
        pending.sort_by_key(|reminder| reminder.fire_at);
        Ok(pending)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryReminderStore {
    reminders: Mutex<BTreeMap<(String, ReminderPhase), ScheduledReminder>>,
}

impl ReminderStore for InMemoryReminderStore {
    fn upsert(&self, reminder: &ScheduledReminder) -> Result<(), InfraError> {
        reminder.validate().map_err(InfraError::InvalidConfig)?;
        let mut reminders = self
            .reminders
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("reminder store lock poisoned: {error}")))?;
        reminders.insert(
            (reminder.subject_id.clone(), reminder.phase),
            reminder.clone(),
        );
        Ok(())
    }

    fn list_pending(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledReminder>, InfraError> {
        let reminders = self
            .reminders
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("reminder store lock poisoned: {error}")))?;
        let mut pending = reminders
            .values()
            .filter(|reminder| reminder.fire_at > now)
            .cloned()
            .collect::<Vec<_>>();
        pending.sort_by_key(|reminder| reminder.fire_at);
        Ok(pending)
    }
}
