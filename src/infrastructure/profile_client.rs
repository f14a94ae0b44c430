use crate::domain::models::{
    ContestInfo, ProfileSnapshot, SolvedCounts, StreakInfo, UpcomingContest, UserStats,
};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

pub const DEFAULT_PROFILE_ENDPOINT: &str = "https://leetcode.com/graphql";

const PROFILE_QUERY: &str = r#"
query userProfile($username: String!, $year: Int) {
  matchedUser(username: $username) {
    username
    profile { ranking }
    submitStatsGlobal { acSubmissionNum { difficulty count } }
    userCalendar(year: $year) { streak totalActiveDays submissionCalendar }
  }
  userContestRanking(username: $username) {
    rating
    attendedContestsCount
    globalRanking
  }
  upcomingContests { title titleSlug startTime duration }
}
"#;

#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_profile(
        &self,
        username: &str,
        year: Option<i32>,
    ) -> Result<ProfileSnapshot, InfraError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for FetchTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            request: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestProfileClient {
    client: Client,
    endpoint: Url,
}

impl ReqwestProfileClient {
    pub fn new(endpoint: &str, timeouts: FetchTimeouts) -> Result<Self, InfraError> {
        let endpoint = Url::parse(endpoint.trim()).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid profile endpoint '{endpoint}': {error}"))
        })?;
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.request)
            .build()
            .map_err(|error| InfraError::InvalidConfig(format!("failed building http client: {error}")))?;
        Ok(Self { client, endpoint })
    }

    fn transport_error(error: reqwest::Error) -> InfraError {
        if error.is_timeout() {
            InfraError::Timeout(error.to_string())
        } else {
            InfraError::Remote(format!("network error while fetching profile: {error}"))
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct GraphqlRequest<'a> {
    query: &'static str,
    variables: ProfileVariables<'a>,
}

#[derive(Debug, serde::Serialize)]
struct ProfileVariables<'a> {
    username: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    year: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<ProfileData>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileData {
    matched_user: Option<MatchedUser>,
    user_contest_ranking: Option<ContestRanking>,
    #[serde(default)]
    upcoming_contests: Option<Vec<ContestPayload>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchedUser {
    username: String,
    profile: Option<ProfilePayload>,
    submit_stats_global: Option<SubmitStats>,
    user_calendar: Option<CalendarPayload>,
}

#[derive(Debug, Deserialize)]
struct ProfilePayload {
    ranking: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitStats {
    #[serde(default)]
    ac_submission_num: Vec<DifficultyCount>,
}

#[derive(Debug, Deserialize)]
struct DifficultyCount {
    difficulty: String,
    count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarPayload {
    streak: Option<u32>,
    total_active_days: Option<u32>,
    submission_calendar: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContestRanking {
    rating: Option<f64>,
    attended_contests_count: Option<u32>,
    global_ranking: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContestPayload {
    title: String,
    title_slug: String,
    start_time: i64,
    duration: i64,
}

/// Maps a GraphQL body onto a snapshot; a missing `matchedUser` is an error.
fn decode_profile_body(
    username: &str,
    body: &str,
    fetched_at: DateTime<Utc>,
) -> Result<ProfileSnapshot, InfraError> {
    let parsed: GraphqlResponse = serde_json::from_str(body)
        .map_err(|error| InfraError::Remote(format!("invalid profile payload: {error}")))?;

    let data = parsed.data;
    let Some(matched) = data.as_ref().and_then(|data| data.matched_user.as_ref()) else {
        if let Some(first) = parsed.errors.first() {
            return Err(InfraError::Remote(format!(
                "profile query reported an error: {}",
                first.message
            )));
        }
        return Err(InfraError::NotFound(username.to_string()));
    };

    let mut solved = SolvedCounts::default();
    for entry in matched
        .submit_stats_global
        .as_ref()
        .map(|stats| stats.ac_submission_num.as_slice())
        .unwrap_or_default()
    {
        match entry.difficulty.to_ascii_lowercase().as_str() {
            "all" => solved.all = entry.count,
            "easy" => solved.easy = entry.count,
            "medium" => solved.medium = entry.count,
            "hard" => solved.hard = entry.count,
            _ => {}
        }
    }

    let calendar = matched.user_calendar.as_ref();
    let ranking = data.as_ref().and_then(|data| data.user_contest_ranking.as_ref());
    let upcoming = data
        .as_ref()
        .and_then(|data| data.upcoming_contests.as_ref())
        .map(|contests| {
            contests
                .iter()
                .filter_map(|contest| {
                    let start_time = DateTime::<Utc>::from_timestamp(contest.start_time, 0)?;
                    Some(UpcomingContest {
                        title: contest.title.trim().to_string(),
                        title_slug: contest.title_slug.trim().to_string(),
                        start_time,
                        duration_seconds: contest.duration.max(0),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let snapshot = ProfileSnapshot {
        username: matched.username.clone(),
        stats: UserStats {
            ranking: matched.profile.as_ref().and_then(|profile| profile.ranking),
            solved,
        },
        streak: StreakInfo {
            current_streak: calendar.and_then(|calendar| calendar.streak).unwrap_or(0),
            total_active_days: calendar
                .and_then(|calendar| calendar.total_active_days)
                .unwrap_or(0),
        },
        contest: ContestInfo {
            rating: ranking.and_then(|ranking| ranking.rating),
            attended_count: ranking
                .and_then(|ranking| ranking.attended_contests_count)
                .unwrap_or(0),
            global_ranking: ranking.and_then(|ranking| ranking.global_ranking),
            upcoming,
        },
        submission_calendar: calendar.and_then(|calendar| calendar.submission_calendar.clone()),
        fetched_at,
    };
    snapshot.validate().map_err(InfraError::Remote)?;
    Ok(snapshot)
}

#[async_trait]
impl ProfileSource for ReqwestProfileClient {
    async fn fetch_profile(
        &self,
        username: &str,
        year: Option<i32>,
    ) -> Result<ProfileSnapshot, InfraError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(InfraError::InvalidConfig("username must not be empty".to_string()));
        }

        let request = GraphqlRequest {
            query: PROFILE_QUERY,
            variables: ProfileVariables { username, year },
        };
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::REFERER, format!("https://leetcode.com/u/{username}/"))
            .json(&request)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(Self::transport_error)?;
        if !status.is_success() {
            return Err(InfraError::Remote(format!(
                "profile api error: http {}",
                status.as_u16()
            )));
        }

        decode_profile_body(username, &body, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::tests::fixed_time;

    const FULL_BODY: &str = r#"{
      "data": {
        "matchedUser": {
          "username": "alice",
          "profile": { "ranking": 120345 },
          "submitStatsGlobal": {
            "acSubmissionNum": [
              { "difficulty": "All", "count": 412 },
              { "difficulty": "Easy", "count": 170 },
              { "difficulty": "Medium", "count": 200 },
              { "difficulty": "Hard", "count": 42 }
            ]
          },
          "userCalendar": {
            "streak": 9,
            "totalActiveDays": 231,
            "submissionCalendar": "{\"1792281600\": 4}"
          }
        },
        "userContestRanking": {
          "rating": 1834.5,
          "attendedContestsCount": 27,
          "globalRanking": 40112
        },
        "upcomingContests": [
          { "title": "Weekly Contest 470", "titleSlug": "weekly-contest-470",
            "startTime": 1792895400, "duration": 5400 }
        ]
      }
    }"#;

    #[test]
    fn decodes_a_matched_user_into_a_snapshot() {
        let fetched_at = fixed_time("2026-10-18T08:00:00Z");
        let snapshot = decode_profile_body("alice", FULL_BODY, fetched_at).expect("decode");

        assert_eq!(snapshot.username, "alice");
        assert_eq!(snapshot.stats.ranking, Some(120_345));
        assert_eq!(snapshot.stats.solved.medium, 200);
        assert_eq!(snapshot.streak.current_streak, 9);
        assert_eq!(snapshot.contest.attended_count, 27);
        assert_eq!(snapshot.contest.upcoming.len(), 1);
        assert_eq!(
            snapshot.contest.upcoming[0].start_time,
            fixed_time("2026-10-25T02:30:00Z")
        );
        assert_eq!(
            snapshot.submission_calendar.as_deref(),
            Some("{\"1792281600\": 4}")
        );
        assert_eq!(snapshot.fetched_at, fetched_at);
    }

    #[test]
    fn missing_matched_user_is_not_found() {
        let body = r#"{ "data": { "matchedUser": null, "userContestRanking": null } }"#;
        let result = decode_profile_body("ghost", body, Utc::now());
        assert!(matches!(result, Err(InfraError::NotFound(name)) if name == "ghost"));
    }

    #[test]
    fn remote_reported_errors_surface_as_remote_failures() {
        let body = r#"{ "data": null, "errors": [ { "message": "rate limited" } ] }"#;
        match decode_profile_body("alice", body, Utc::now()) {
            Err(InfraError::Remote(message)) => assert!(message.contains("rate limited")),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[test]
    fn undecodable_bodies_are_remote_failures() {
        assert!(matches!(
            decode_profile_body("alice", "<html>busy</html>", Utc::now()),
            Err(InfraError::Remote(_))
        ));
    }

    #[test]
    fn sparse_payloads_fall_back_to_defaults() {
        let body = r#"{ "data": { "matchedUser": { "username": "alice" } } }"#;
        let snapshot = decode_profile_body("alice", body, Utc::now()).expect("decode");
        assert_eq!(snapshot.streak, StreakInfo::default());
        assert!(snapshot.submission_calendar.is_none());
        assert!(snapshot.contest.upcoming.is_empty());
    }

    #[test]
    fn client_rejects_an_invalid_endpoint() {
        assert!(matches!(
            ReqwestProfileClient::new("not a url", FetchTimeouts::default()),
            Err(InfraError::InvalidConfig(_))
        ));
    }
}
