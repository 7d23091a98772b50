use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use reqwest::Url;

use liveticker_core::TickerMode;
use liveticker_engine::{EngineConfig, TelegramMessenger};

/// A ticker to create at startup (`--track CHAT_ID=URL[,label[,mode]]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSpec {
    pub chat_id: String,
    pub url: String,
    pub label: String,
    pub mode: TickerMode,
}

fn parse_track(input: &str) -> Result<TrackSpec, String> {
    let (chat_id, rest) = input
        .split_once('=')
        .ok_or_else(|| format!("expected CHAT_ID=URL[,label[,mode]], got {input:?}"))?;
    let chat_id = chat_id.trim();
    if chat_id.is_empty() {
        return Err(format!("missing chat id in {input:?}"));
    }

    let mut parts = rest.splitn(3, ',').map(str::trim);
    let url = parts.next().unwrap_or_default();
    if url.is_empty() {
        return Err(format!("missing feed url in {input:?}"));
    }
    let label = parts.next().unwrap_or_default();
    let mode = match parts.next() {
        Some(mode) if !mode.is_empty() => mode.parse()?,
        _ => TickerMode::Live,
    };

    Ok(TrackSpec {
        chat_id: chat_id.to_string(),
        url: url.to_string(),
        label: label.to_string(),
        mode,
    })
}

#[derive(Debug, Clone, Parser)]
#[command(name = "liveticker", version, about = "Live sports ticker for chat groups")]
pub struct Cli {
    /// Directory for seen-event and schedule snapshots (default: $XDG_STATE_HOME/liveticker).
    #[arg(long, env = "LIVETICKER_STATE_DIR", value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Keep snapshots in memory only; nothing survives a restart.
    #[arg(long, env = "LIVETICKER_EPHEMERAL", default_value_t = false)]
    pub ephemeral: bool,

    /// Maximum number of feed jobs running at once.
    #[arg(
        long,
        env = "LIVETICKER_MAX_WORKERS",
        default_value_t = EngineConfig::DEFAULT_MAX_WORKERS as u16,
        value_parser = clap::value_parser!(u16).range(1..=64)
    )]
    pub max_workers: u16,

    /// Dispatcher period in milliseconds.
    #[arg(
        long,
        env = "LIVETICKER_DISPATCH_INTERVAL_MS",
        default_value_t = EngineConfig::DEFAULT_DISPATCH_INTERVAL.as_millis() as u64
    )]
    pub dispatch_interval_ms: u64,

    /// Poll scheduler period in milliseconds (one ticker per period).
    #[arg(
        long,
        env = "LIVETICKER_POLL_INTERVAL_MS",
        default_value_t = EngineConfig::DEFAULT_POLL_INTERVAL.as_millis() as u64
    )]
    pub poll_interval_ms: u64,

    /// Timeout for a single feed request, in seconds.
    #[arg(
        long,
        env = "LIVETICKER_FETCH_TIMEOUT_SECS",
        default_value_t = EngineConfig::DEFAULT_FETCH_TIMEOUT.as_secs()
    )]
    pub fetch_timeout_secs: u64,

    /// Start polling this many minutes before kickoff.
    #[arg(
        long,
        env = "LIVETICKER_LEAD_WINDOW_MINS",
        default_value_t = EngineConfig::DEFAULT_LEAD_WINDOW.as_secs() / 60
    )]
    pub lead_window_mins: u64,

    /// Recap period for tickers in recap mode, in minutes.
    #[arg(
        long,
        env = "LIVETICKER_RECAP_INTERVAL_MINS",
        default_value_t = EngineConfig::DEFAULT_RECAP_INTERVAL.as_secs() / 60
    )]
    pub recap_interval_mins: u64,

    /// Regulation length in minutes; a period end after it ends the game.
    #[arg(
        long,
        env = "LIVETICKER_REGULATION_MINUTES",
        default_value_t = EngineConfig::DEFAULT_REGULATION_MINUTES
    )]
    pub regulation_minutes: u32,

    /// How long a finished ticker stays registered, in minutes.
    #[arg(
        long,
        env = "LIVETICKER_RETENTION_MINS",
        default_value_t = EngineConfig::DEFAULT_RETENTION.as_secs() / 60
    )]
    pub retention_mins: u64,

    /// Chat bot token. Falls back to the settings file.
    #[arg(long, env = "LIVETICKER_BOT_TOKEN", hide_env_values = true)]
    pub bot_token: Option<String>,

    /// Bot API base URL.
    #[arg(
        long,
        env = "LIVETICKER_TELEGRAM_API_URL",
        default_value = TelegramMessenger::DEFAULT_API_URL
    )]
    pub telegram_api_url: Url,

    /// Endpoint that writes end-of-game summaries. Falls back to the settings file.
    #[arg(long, env = "LIVETICKER_SUMMARY_URL")]
    pub summary_url: Option<Url>,

    /// Timeout for one summary request, in seconds. Text generation is slow.
    #[arg(long, env = "LIVETICKER_SUMMARY_TIMEOUT_SECS", default_value_t = 90)]
    pub summary_timeout_secs: u64,

    /// Print messages to stdout instead of sending them.
    #[arg(long, env = "LIVETICKER_DRY_RUN", default_value_t = false)]
    pub dry_run: bool,

    /// Create a ticker at startup (repeatable).
    #[arg(long, value_name = "CHAT_ID=URL[,label[,mode]]", value_parser = parse_track)]
    pub track: Vec<TrackSpec>,
}

impl Cli {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_workers: self.max_workers as usize,
            dispatch_interval: Duration::from_millis(self.dispatch_interval_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            lead_window: Duration::from_secs(self.lead_window_mins * 60),
            recap_interval: Duration::from_secs(self.recap_interval_mins * 60),
            regulation_minutes: self.regulation_minutes,
            retention: Duration::from_secs(self.retention_mins * 60),
            ..EngineConfig::default()
        }
    }
}
