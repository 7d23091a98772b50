//! Outbound collaborators: chat delivery, game summaries and player stats.

use async_trait::async_trait;
use liveticker_core::{Event, Lineup, Player, TeamNames};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{SendError, truncate_body};

/// Delivers text to a chat. Failures are reported per message.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send `text` (HTML formatted) to `chat_id`.
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), SendError>;
}

/// Writes an end-of-game narrative.
#[async_trait]
pub trait SummaryGenerator: Send + Sync {
    /// Summarise a finished game. An empty string means "no summary".
    async fn summarize(
        &self,
        events: &[Event],
        teams: &TeamNames,
        context_label: &str,
        lineup: &Lineup,
    ) -> String;
}

/// Renders end-of-game statistics from lineup data.
pub trait StatsExtractor: Send + Sync {
    /// Render stats for both teams. An empty string means "nothing to report".
    fn extract_stats(&self, lineup: &Lineup, teams: &TeamNames) -> String;
}

/// Sends messages through the Telegram Bot API (`sendMessage`, HTML parse mode).
#[derive(Debug, Clone)]
pub struct TelegramMessenger {
    http: reqwest::Client,
    endpoint: Url,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

impl TelegramMessenger {
    /// Default Bot API base URL.
    pub const DEFAULT_API_URL: &'static str = "https://api.telegram.org/";

    /// Messenger for `token`, talking to `api_base` (normally [`Self::DEFAULT_API_URL`]).
    pub fn new(http: reqwest::Client, api_base: &Url, token: &str) -> anyhow::Result<Self> {
        let endpoint = api_base.join(&format!("./bot{token}/sendMessage"))?;
        Ok(Self { http, endpoint })
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), SendError> {
        let res = self
            .http
            .post(self.endpoint.clone())
            .json(&SendMessageRequest {
                chat_id,
                text,
                parse_mode: "HTML",
                disable_web_page_preview: true,
            })
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(SendError::Rejected {
                status,
                body: truncate_body(&body),
            });
        }
        debug!(chat_id, "message delivered");
        Ok(())
    }
}

/// Prints messages to stdout instead of sending them (dry runs).
#[derive(Debug, Clone, Default)]
pub struct ConsoleMessenger;

#[async_trait]
impl Messenger for ConsoleMessenger {
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), SendError> {
        println!("[{chat_id}]\n{text}\n");
        Ok(())
    }
}

/// Never produces a summary.
#[derive(Debug, Clone, Default)]
pub struct DisabledSummary;

#[async_trait]
impl SummaryGenerator for DisabledSummary {
    async fn summarize(&self, _: &[Event], _: &TeamNames, _: &str, _: &Lineup) -> String {
        String::new()
    }
}

/// Asks an HTTP service for the summary text.
///
/// The service receives the chronological events, teams, label and lineup and
/// answers `{"text": "..."}`. Any failure yields an empty summary.
#[derive(Debug, Clone)]
pub struct HttpSummaryGenerator {
    http: reqwest::Client,
    url: Url,
}

#[derive(Debug, Serialize)]
struct SummaryRequest<'a> {
    events: &'a [Event],
    teams: &'a TeamNames,
    context: &'a str,
    lineup: &'a Lineup,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(default)]
    text: String,
}

impl HttpSummaryGenerator {
    /// Generator posting to `url`.
    pub fn new(http: reqwest::Client, url: Url) -> Self {
        Self { http, url }
    }

    async fn request(&self, body: &SummaryRequest<'_>) -> anyhow::Result<String> {
        let res = self.http.post(self.url.clone()).json(body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            anyhow::bail!("http {status}: {}", truncate_body(&body));
        }
        let parsed: SummaryResponse = res.json().await?;
        Ok(parsed.text.trim().to_string())
    }
}

#[async_trait]
impl SummaryGenerator for HttpSummaryGenerator {
    async fn summarize(
        &self,
        events: &[Event],
        teams: &TeamNames,
        context_label: &str,
        lineup: &Lineup,
    ) -> String {
        let body = SummaryRequest {
            events,
            teams,
            context: context_label,
            lineup,
        };
        match self.request(&body).await {
            Ok(text) => text,
            Err(err) => {
                warn!("summary generation failed, skipping: {err:#}");
                String::new()
            }
        }
    }
}

/// Top scorers and penalty counts per team.
#[derive(Debug, Clone)]
pub struct LineupStats {
    /// How many scorers to list per team.
    pub top_scorers: usize,
}

impl Default for LineupStats {
    fn default() -> Self {
        Self { top_scorers: 3 }
    }
}

impl LineupStats {
    fn team_line(&self, name: &str, players: &[Player]) -> String {
        let mut scorers: Vec<&Player> = players.iter().filter(|p| p.goals > 0).collect();
        scorers.sort_by(|a, b| b.goals.cmp(&a.goals).then_with(|| a.name.cmp(&b.name)));

        let top = scorers
            .iter()
            .take(self.top_scorers)
            .map(|p| match p.number {
                Some(n) => format!("{} (#{n}) {}", crate::format::escape_html(&p.name), p.goals),
                None => format!("{} {}", crate::format::escape_html(&p.name), p.goals),
            })
            .collect::<Vec<_>>();
        let penalties: u32 = players.iter().map(|p| p.penalties).sum();
        let red_cards = players.iter().filter(|p| p.disqualified).count();

        let mut line = format!("<b>{}</b>", crate::format::escape_html(name));
        if top.is_empty() {
            line.push_str("\nTop scorers: –");
        } else {
            line.push_str(&format!("\nTop scorers: {}", top.join(", ")));
        }
        line.push_str(&format!("\n2-minute penalties: {penalties}"));
        if red_cards > 0 {
            line.push_str(&format!("\nDisqualifications: {red_cards}"));
        }
        line
    }
}

impl StatsExtractor for LineupStats {
    fn extract_stats(&self, lineup: &Lineup, teams: &TeamNames) -> String {
        if lineup.is_empty() {
            return String::new();
        }
        format!(
            "📊 Statistics\n\n{}\n\n{}",
            self.team_line(&teams.home, &lineup.home),
            self.team_line(&teams.guest, &lineup.guest)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(name: &str, number: u32, goals: u32, penalties: u32) -> Player {
        Player {
            name: name.to_string(),
            number: Some(number),
            goals,
            penalties,
            disqualified: false,
        }
    }

    #[test]
    fn stats_list_top_scorers_in_goal_order() {
        let lineup = Lineup {
            home: vec![
                player("Lichtlein", 3, 4, 0),
                player("Gidsel", 4, 9, 1),
                player("Andersson", 24, 6, 1),
                player("Darj", 2, 0, 2),
            ],
            guest: vec![player("Ekberg", 11, 7, 0)],
        };
        let teams = TeamNames {
            home: "Füchse".to_string(),
            guest: "Kiel".to_string(),
        };
        let text = LineupStats { top_scorers: 2 }.extract_stats(&lineup, &teams);
        assert!(text.contains("Top scorers: Gidsel (#4) 9, Andersson (#24) 6"));
        assert!(!text.contains("Lichtlein"));
        assert!(text.contains("2-minute penalties: 4"));
        assert!(text.contains("<b>Kiel</b>\nTop scorers: Ekberg (#11) 7"));
    }

    #[test]
    fn stats_are_empty_without_lineup() {
        let text = LineupStats::default().extract_stats(&Lineup::default(), &TeamNames::default());
        assert!(text.is_empty());
    }

    #[test]
    fn telegram_endpoint_embeds_token() {
        let base = Url::parse(TelegramMessenger::DEFAULT_API_URL).unwrap();
        let messenger = TelegramMessenger::new(reqwest::Client::new(), &base, "123:abc").unwrap();
        assert_eq!(
            messenger.endpoint.as_str(),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }
}
