//! Feed client contract and the HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use liveticker_core::{Event, EventKind, Lineup, Side, Snapshot, Summary, TeamNames};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{FetchError, truncate_body};

/// Source of game snapshots.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Fetch the current state of the game at `resource_locator`.
    async fn fetch(&self, resource_locator: &str) -> Result<Snapshot, FetchError>;
}

/// Fetches snapshots over HTTP. Every request is bounded by the client timeout.
#[derive(Debug, Clone)]
pub struct HttpFeedClient {
    http: reqwest::Client,
}

impl HttpFeedClient {
    /// Build a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("liveticker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| FetchError::Transport(format!("build http client: {err}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl FeedClient for HttpFeedClient {
    async fn fetch(&self, resource_locator: &str) -> Result<Snapshot, FetchError> {
        let res = self
            .http
            .get(resource_locator)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status,
                body: truncate_body(&body),
            });
        }
        let body = res.text().await?;
        parse_snapshot(&body)
    }
}

#[derive(Debug, Deserialize)]
struct FeedResponse {
    summary: Option<SummaryDto>,
    events: Option<Vec<EventDto>>,
    #[serde(default)]
    lineup: Option<Lineup>,
}

#[derive(Debug, Deserialize)]
struct SummaryDto {
    #[serde(default, alias = "kickoff_at", alias = "startsAt")]
    kickoff: Option<Value>,
    #[serde(default, alias = "home_team", alias = "homeTeam")]
    home: Option<String>,
    #[serde(default, alias = "guest_team", alias = "guestTeam", alias = "away")]
    guest: Option<String>,
    #[serde(default, alias = "updated_at", alias = "updatedAt", alias = "lastUpdate")]
    version: Option<Value>,
    #[serde(default)]
    competition: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventDto {
    id: Value,
    #[serde(rename = "type")]
    kind: EventKind,
    #[serde(default)]
    time: String,
    #[serde(default)]
    score: String,
    #[serde(default)]
    team: Option<Side>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    timestamp: i64,
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_kickoff(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            let secs = n.as_i64()?;
            // Feeds often send milliseconds; a seconds value past year 5000 is one.
            let secs = if secs > 100_000_000_000 { secs / 1000 } else { secs };
            Utc.timestamp_opt(secs, 0).single()
        }
        _ => None,
    }
}

/// Decode and validate a feed payload.
///
/// `summary` and `events` are required. Events keep the feed's newest-first order.
pub(crate) fn parse_snapshot(body: &str) -> Result<Snapshot, FetchError> {
    let res: FeedResponse =
        serde_json::from_str(body).map_err(|err| FetchError::Malformed(err.to_string()))?;
    let summary = res
        .summary
        .ok_or_else(|| FetchError::Malformed("missing summary".to_string()))?;
    let raw_events = res
        .events
        .ok_or_else(|| FetchError::Malformed("missing events".to_string()))?;

    let mut events = Vec::with_capacity(raw_events.len());
    for dto in raw_events {
        let id = scalar_to_string(&dto.id)
            .ok_or_else(|| FetchError::Malformed(format!("event without usable id: {}", dto.id)))?;
        events.push(Event {
            id,
            kind: dto.kind,
            time: dto.time,
            score: dto.score,
            team: dto.team,
            message: dto.message,
            timestamp: dto.timestamp,
        });
    }

    // Without an explicit marker, derive one from the newest event so unchanged
    // feeds still short-circuit.
    let version = summary
        .version
        .as_ref()
        .and_then(scalar_to_string)
        .unwrap_or_else(|| match events.first() {
            Some(newest) => format!("{}:{}", events.len(), newest.id),
            None => "0".to_string(),
        });

    Ok(Snapshot {
        summary: Summary {
            kickoff: summary.kickoff.as_ref().and_then(parse_kickoff),
            teams: TeamNames {
                home: summary.home.unwrap_or_else(|| "Home".to_string()),
                guest: summary.guest.unwrap_or_else(|| "Guest".to_string()),
            },
            version,
            competition: summary.competition,
        },
        events,
        lineup: res.lineup.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_payload() {
        let body = r#"{
            "summary": {
                "kickoff": "2026-10-18T19:00:00+02:00",
                "homeTeam": "Füchse Berlin",
                "guestTeam": "THW Kiel",
                "updatedAt": 1729270800
            },
            "events": [
                {"id": 2, "type": "goal", "time": "01:10", "score": "1-0", "team": "Home", "message": "Gidsel", "timestamp": 20},
                {"id": "1", "type": "StartPeriod", "time": "00:00", "timestamp": 10}
            ],
            "lineup": {"home": [{"name": "Gidsel", "number": 4, "goals": 1}]}
        }"#;
        let snap = parse_snapshot(body).unwrap();
        assert_eq!(snap.summary.teams.home, "Füchse Berlin");
        assert_eq!(snap.summary.version, "1729270800");
        assert_eq!(
            snap.summary.kickoff.unwrap().to_rfc3339(),
            "2026-10-18T17:00:00+00:00"
        );
        let ids: Vec<_> = snap.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["2", "1"]);
        assert_eq!(snap.events[1].kind, EventKind::PeriodStart);
        assert_eq!(snap.lineup.home[0].goals, 1);
    }

    #[test]
    fn missing_required_sections_are_malformed() {
        assert!(matches!(
            parse_snapshot(r#"{"events": []}"#),
            Err(FetchError::Malformed(msg)) if msg.contains("summary")
        ));
        assert!(matches!(
            parse_snapshot(r#"{"summary": {}}"#),
            Err(FetchError::Malformed(msg)) if msg.contains("events")
        ));
        assert!(matches!(parse_snapshot("<html>"), Err(FetchError::Malformed(_))));
    }

    #[test]
    fn version_falls_back_to_newest_event() {
        let snap = parse_snapshot(
            r#"{"summary": {}, "events": [{"id": "e9", "type": "timeout"}, {"id": "e8", "type": "goal"}]}"#,
        )
        .unwrap();
        assert_eq!(snap.summary.version, "2:e9");
        assert_eq!(snap.summary.kickoff, None);
        assert_eq!(snap.summary.teams.guest, "Guest");
    }

    #[test]
    fn millisecond_kickoff_is_accepted() {
        let dt = parse_kickoff(&serde_json::json!(1_760_810_400_000_i64)).unwrap();
        assert_eq!(dt.timestamp(), 1_760_810_400);
    }
}
