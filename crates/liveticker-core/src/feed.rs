//! Match data as delivered by the live feed.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a single feed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    #[serde(alias = "Goal")]
    Goal,
    #[serde(alias = "SevenMeterGoal")]
    SevenMeterGoal,
    #[serde(alias = "SevenMeterMissed")]
    SevenMeterMiss,
    #[serde(alias = "TwoMinutePenalty")]
    Penalty,
    #[serde(alias = "Warning")]
    YellowCard,
    #[serde(alias = "Disqualification")]
    RedCard,
    #[serde(alias = "Timeout")]
    Timeout,
    #[serde(alias = "StartPeriod")]
    PeriodStart,
    #[serde(alias = "StopPeriod")]
    PeriodEnd,
    #[serde(other)]
    Other,
}

impl EventKind {
    pub fn is_goal(self) -> bool {
        matches!(self, EventKind::Goal | EventKind::SevenMeterGoal)
    }

    /// Period start/end markers. These interrupt a pending recap.
    pub fn is_period_boundary(self) -> bool {
        matches!(self, EventKind::PeriodStart | EventKind::PeriodEnd)
    }
}

/// Which team an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[serde(alias = "Home")]
    Home,
    #[serde(alias = "Guest", alias = "away", alias = "Away")]
    Guest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique within one feed.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Game clock, e.g. `"27:41"`.
    #[serde(default)]
    pub time: String,
    /// Running score after the event, e.g. `"12-11"` (home first).
    #[serde(default)]
    pub score: String,
    #[serde(default)]
    pub team: Option<Side>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl Event {
    pub fn minute(&self) -> Option<u32> {
        clock_minute(&self.time)
    }
}

/// Minute part of a `mm:ss` game clock.
pub fn clock_minute(clock: &str) -> Option<u32> {
    clock.trim().split(':').next()?.trim().parse().ok()
}

/// Split a `"12-11"` / `"12:11"` score into `(home, guest)`.
pub fn parse_score(score: &str) -> Option<(u32, u32)> {
    let (home, guest) = score.trim().split_once(['-', ':'])?;
    Some((home.trim().parse().ok()?, guest.trim().parse().ok()?))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamNames {
    pub home: String,
    pub guest: String,
}

impl TeamNames {
    pub fn name(&self, side: Side) -> &str {
        match side {
            Side::Home => &self.home,
            Side::Guest => &self.guest,
        }
    }
}

impl fmt::Display for TeamNames {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} – {}", self.home, self.guest)
    }
}

/// Game metadata attached to every feed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub kickoff: Option<DateTime<Utc>>,
    pub teams: TeamNames,
    /// Opaque change marker. Equal markers mean nothing new happened.
    pub version: String,
    #[serde(default)]
    pub competition: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub goals: u32,
    #[serde(default)]
    pub penalties: u32,
    #[serde(default)]
    pub disqualified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineup {
    #[serde(default)]
    pub home: Vec<Player>,
    #[serde(default)]
    pub guest: Vec<Player>,
}

impl Lineup {
    pub fn is_empty(&self) -> bool {
        self.home.is_empty() && self.guest.is_empty()
    }
}

/// One fetched view of a game. `events` is newest-first, as the feed reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub summary: Summary,
    pub events: Vec<Event>,
    #[serde(default)]
    pub lineup: Lineup,
}

impl Snapshot {
    pub fn events_oldest_first(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().rev()
    }
}

/// How a ticker delivers events to its chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickerMode {
    /// One message per event, as it happens.
    Live,
    /// Events are buffered and sent as periodic digests.
    Recap,
}

impl fmt::Display for TickerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TickerMode::Live => "live",
            TickerMode::Recap => "recap",
        })
    }
}

impl FromStr for TickerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(TickerMode::Live),
            "recap" => Ok(TickerMode::Recap),
            other => Err(format!("unknown ticker mode {other:?} (expected live or recap)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_minute_reads_leading_component() {
        assert_eq!(clock_minute("30:00"), Some(30));
        assert_eq!(clock_minute(" 07:12"), Some(7));
        assert_eq!(clock_minute("60"), Some(60));
        assert_eq!(clock_minute(""), None);
        assert_eq!(clock_minute("xx:10"), None);
    }

    #[test]
    fn parse_score_accepts_dash_and_colon() {
        assert_eq!(parse_score("12-11"), Some((12, 11)));
        assert_eq!(parse_score("3 : 4"), Some((3, 4)));
        assert_eq!(parse_score("12"), None);
    }

    #[test]
    fn unknown_event_types_fall_back_to_other() {
        let ev: Event = serde_json::from_str(
            r#"{"id":"1","type":"video_review","time":"10:00","timestamp":5}"#,
        )
        .unwrap();
        assert_eq!(ev.kind, EventKind::Other);
        assert_eq!(ev.team, None);

        let ev: Event =
            serde_json::from_str(r#"{"id":"2","type":"StopPeriod","team":"Home"}"#).unwrap();
        assert_eq!(ev.kind, EventKind::PeriodEnd);
        assert_eq!(ev.team, Some(Side::Home));
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Recap".parse::<TickerMode>(), Ok(TickerMode::Recap));
        assert_eq!(" live ".parse::<TickerMode>(), Ok(TickerMode::Live));
        assert!("loud".parse::<TickerMode>().is_err());
    }
}
