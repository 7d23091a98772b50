mod cli;
mod console;
mod shutdown;

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use reqwest::Url;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use liveticker_core::settings::{BotSettings, ensure_settings};
use liveticker_core::{JsonFileStore, MemoryStore, SnapshotStore, TickerMode};
use liveticker_engine::{
    Collaborators, ConsoleMessenger, DisabledSummary, EngineEvent, EngineHandle, HttpFeedClient,
    HttpSummaryGenerator, JobStatus, LineupStats, Messenger, SummaryGenerator, TelegramMessenger,
    start_engine,
};

use crate::cli::Cli;
use crate::console::{Command, USAGE, format_status, spawn_stdin_reader};
use crate::shutdown::{ShutdownController, ShutdownEvent, spawn_signal_handler};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,liveticker=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn load_bot_settings(cli: &Cli) -> BotSettings {
    let from_cli = BotSettings {
        bot_token: cli.bot_token.clone(),
        summary_url: cli.summary_url.as_ref().map(Url::to_string),
    };
    // Prompting only makes sense when a token is still missing.
    let interactive = std::io::stdin().is_terminal() && !cli.dry_run && cli.bot_token.is_none();
    let file = match ensure_settings(interactive) {
        Ok(Some(settings)) => settings,
        Ok(None) => BotSettings::default(),
        Err(err) => {
            warn!("failed to read/write settings: {err:#}");
            BotSettings::default()
        }
    };
    from_cli.merged_over(&file)
}

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("build http client")
}

fn build_collaborators(cli: &Cli, settings: &BotSettings) -> anyhow::Result<Collaborators> {
    let timeout = Duration::from_secs(cli.fetch_timeout_secs);
    let http = http_client(timeout)?;

    let messenger: Arc<dyn Messenger> = match (&settings.bot_token, cli.dry_run) {
        (_, true) => Arc::new(ConsoleMessenger),
        (Some(token), false) => Arc::new(TelegramMessenger::new(
            http,
            &cli.telegram_api_url,
            token,
        )?),
        (None, false) => anyhow::bail!(
            "no bot token configured (use --bot-token, LIVETICKER_BOT_TOKEN, the settings file, or --dry-run)"
        ),
    };

    let summaries: Arc<dyn SummaryGenerator> = match &settings.summary_url {
        Some(url) => {
            let url = Url::parse(url).with_context(|| format!("invalid summary url {url:?}"))?;
            let http = http_client(Duration::from_secs(cli.summary_timeout_secs))?;
            Arc::new(HttpSummaryGenerator::new(http, url))
        }
        None => Arc::new(DisabledSummary),
    };

    let store: Arc<dyn SnapshotStore> = if cli.ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        let dir = match &cli.state_dir {
            Some(dir) => dir.clone(),
            None => JsonFileStore::default_dir()?,
        };
        info!(dir = %dir.display(), "snapshot directory");
        Arc::new(JsonFileStore::new(dir))
    };

    Ok(Collaborators {
        feed: Arc::new(HttpFeedClient::new(timeout)?),
        messenger,
        summaries,
        stats: Arc::new(LineupStats::default()),
        store,
    })
}

fn create(engine: &EngineHandle, chat_id: &str, url: &str, label: &str, mode: TickerMode) {
    match engine.create_ticker(url, chat_id, label, mode) {
        Ok(()) => println!("ticker for {chat_id} created ({mode})"),
        Err(err) => eprintln!("cannot start ticker for {chat_id}: {err}"),
    }
}

/// Returns true when the console asked to quit.
async fn handle_command(engine: &EngineHandle, command: Command) -> bool {
    match command {
        Command::Start {
            chat_id,
            url,
            label,
            mode,
        } => create(engine, &chat_id, &url, &label, mode),
        Command::Stop { chat_id } => {
            if engine.stop_ticker(&chat_id).await {
                println!("ticker for {chat_id} stopped");
            } else {
                println!("no ticker for {chat_id}");
            }
        }
        Command::Reset { chat_id } => {
            if engine.reset_ticker(&chat_id).await {
                println!("ticker for {chat_id} reset");
            } else {
                println!("nothing to reset for {chat_id}");
            }
        }
        Command::Status => println!("{}", format_status(&engine.status())),
        Command::Help => println!("{USAGE}"),
        Command::Quit => return true,
    }
    false
}

fn log_event(evt: &EngineEvent) {
    match evt {
        EngineEvent::Started => info!("engine started"),
        EngineEvent::StopRequested => info!("engine stopping"),
        EngineEvent::TickerCreated { chat_id, mode } => debug!(%chat_id, %mode, "ticker created"),
        EngineEvent::PhaseChanged { chat_id, phase } => info!(%chat_id, ?phase, "phase changed"),
        EngineEvent::TickerRemoved { chat_id } => info!(%chat_id, "ticker removed"),
        EngineEvent::JobFinished { outcome } => match &outcome.status {
            JobStatus::Failed { error } => warn!(
                chat_id = %outcome.chat_id,
                kind = ?outcome.kind,
                ms = outcome.total_ms,
                "job failed: {error}"
            ),
            status => debug!(
                chat_id = %outcome.chat_id,
                kind = ?outcome.kind,
                ms = outcome.total_ms,
                ?status,
                "job finished"
            ),
        },
        // Already logged where it was raised.
        EngineEvent::Warning { .. } => {}
        EngineEvent::Stopped => info!("engine stopped"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let settings = load_bot_settings(&cli);
    let collaborators = build_collaborators(&cli, &settings)?;

    let cfg = cli.engine_config();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        max_workers = cfg.max_workers,
        dry_run = cli.dry_run,
        "liveticker starting"
    );
    let engine = start_engine(cfg, collaborators);
    let mut events = engine.subscribe();

    for track in &cli.track {
        create(&engine, &track.chat_id, &track.url, &track.label, track.mode);
    }

    let shutdown = Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_signal_handler(shutdown.clone(), shutdown_tx);

    let (command_tx, mut command_rx) = tokio::sync::mpsc::unbounded_channel::<Command>();
    spawn_stdin_reader(command_tx);
    if std::io::stdin().is_terminal() {
        println!("{USAGE}");
    }

    let mut immediate_exit = false;

    loop {
        tokio::select! {
            ev_opt = shutdown_rx.recv() => {
                match ev_opt {
                    Some(ShutdownEvent::Graceful) => {
                        eprintln!("Stop requested, finishing running jobs before exiting (press CTRL+C again to exit immediately).");
                        engine.request_stop();
                    }
                    Some(ShutdownEvent::Immediate) => {
                        eprintln!("Stop requested again, exiting immediately.");
                        immediate_exit = true;
                        break;
                    }
                    None => {}
                }
            }
            Some(command) = command_rx.recv() => {
                if handle_command(&engine, command).await {
                    match shutdown.request() {
                        ShutdownEvent::Graceful => engine.request_stop(),
                        ShutdownEvent::Immediate => {
                            immediate_exit = true;
                            break;
                        }
                    }
                }
            }
            evt = events.recv() => {
                let evt = match evt {
                    Ok(v) => v,
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "event stream lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                log_event(&evt);
                if evt == EngineEvent::Stopped {
                    break;
                }
            }
        }
    }

    if immediate_exit {
        std::process::exit(130);
    }

    engine.wait().await?;
    Ok(())
}
