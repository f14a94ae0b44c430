use crate::domain::calendar_index::DateCount;
use crate::domain::models::{
    Notification, ProfileSnapshot, ReminderPhase, ScheduledReminder, UpcomingContest,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};

const SUMMARY_DELAY_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderOffsets {
    pub pre_lead: Duration,
    pub summary_delay: Duration,
}

impl ReminderOffsets {
    pub fn with_lead_minutes(lead_minutes: u32) -> Self {
        Self {
            pre_lead: Duration::minutes(i64::from(lead_minutes)),
            summary_delay: Duration::minutes(SUMMARY_DELAY_MINUTES),
        }
    }
}

/// Every reminder still in the future for the snapshot's upcoming contests.
pub fn plan_contest_reminders(
    snapshot: &ProfileSnapshot,
    offsets: ReminderOffsets,
    now: DateTime<Utc>,
) -> Vec<ScheduledReminder> {
    snapshot
        .contest
        .upcoming
        .iter()
        .filter(|contest| !contest.title_slug.trim().is_empty())
        .flat_map(|contest| {
            ReminderPhase::ALL
                .into_iter()
                .map(move |phase| contest_reminder(contest, phase, offsets))
        })
        .filter(|reminder| reminder.fire_at > now)
        .collect()
}

fn contest_reminder(
    contest: &UpcomingContest,
    phase: ReminderPhase,
    offsets: ReminderOffsets,
) -> ScheduledReminder {
    let end = contest.start_time + Duration::seconds(contest.duration_seconds.max(0));
    let (fire_at, body) = match phase {
        ReminderPhase::Pre => (
            contest.start_time - offsets.pre_lead,
            format!("Starts in {} minutes", offsets.pre_lead.num_minutes()),
        ),
        ReminderPhase::Start => (contest.start_time, "Contest is live now".to_string()),
        ReminderPhase::Summary => (
            end + offsets.summary_delay,
            "Contest finished. Rating updates follow shortly".to_string(),
        ),
    };
    ScheduledReminder {
        subject_id: contest.title_slug.trim().to_string(),
        phase,
        fire_at,
        title: contest.title.clone(),
        body,
    }
}

/// Nudge only when there is a streak to lose and nothing was submitted today.
pub fn streak_nudge(
    snapshot: &ProfileSnapshot,
    counts: &DateCount,
    today: NaiveDate,
) -> Option<Notification> {
    if counts.get(&today).copied().unwrap_or(0) > 0 {
        return None;
    }
    let streak = snapshot.streak.current_streak;
    if streak == 0 {
        return None;
    }
    Some(Notification {
        key: format!("streak:{}:{today}", snapshot.username),
        title: "Streak at risk".to_string(),
        body: format!("Solve one problem today to keep your {streak}-day streak"),
    })
}
