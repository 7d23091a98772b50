//! Line-based operator console on stdin.

use std::fmt::Write as _;

use liveticker_core::TickerMode;
use liveticker_engine::StatusSnapshot;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

pub const USAGE: &str = "commands: start <chat_id> <feed_url> [label...] [live|recap] | stop <chat_id> | reset <chat_id> | status | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start {
        chat_id: String,
        url: String,
        label: String,
        mode: TickerMode,
    },
    Stop {
        chat_id: String,
    },
    Reset {
        chat_id: String,
    },
    Status,
    Quit,
    Help,
}

/// Parse one console line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let one_chat = |args: &[&str]| match args {
        [chat_id] => Ok(chat_id.to_string()),
        _ => Err(format!("usage: {verb} <chat_id>")),
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "start" => {
            let [chat_id, url, rest @ ..] = args.as_slice() else {
                return Err("usage: start <chat_id> <feed_url> [label...] [live|recap]".to_string());
            };
            let (mode, label_words) = match rest.split_last() {
                Some((last, init)) => match last.parse::<TickerMode>() {
                    Ok(mode) => (mode, init),
                    Err(_) => (TickerMode::Live, rest),
                },
                None => (TickerMode::Live, rest),
            };
            Command::Start {
                chat_id: chat_id.to_string(),
                url: url.to_string(),
                label: label_words.join(" "),
                mode,
            }
        }
        "stop" => Command::Stop {
            chat_id: one_chat(&args)?,
        },
        "reset" => Command::Reset {
            chat_id: one_chat(&args)?,
        },
        "status" => Command::Status,
        "quit" | "exit" => Command::Quit,
        "help" | "?" => Command::Help,
        other => return Err(format!("unknown command {other:?}")),
    };
    Ok(Some(command))
}

/// Read stdin until EOF, forwarding parsed commands. Parse errors are printed in place.
pub fn spawn_stdin_reader(tx: mpsc::UnboundedSender<Command>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return,
                Err(err) => {
                    tracing::warn!("console input closed: {err}");
                    return;
                }
            };
            match parse_command(&line) {
                Ok(Some(command)) => {
                    if tx.send(command).is_err() {
                        return;
                    }
                }
                Ok(None) => {}
                Err(err) => eprintln!("{err}\n{USAGE}"),
            }
        }
    });
}

pub fn format_status(status: &StatusSnapshot) -> String {
    let mut out = format!(
        "workers={} queued={} tickers={}{}",
        status.active_workers,
        status.queued_jobs,
        status.tickers.len(),
        if status.stop_requested {
            " (stopping)"
        } else {
            ""
        }
    );
    for t in &status.tickers {
        let teams = t
            .teams
            .as_ref()
            .map(|teams| format!("{} vs {}", teams.home, teams.guest))
            .unwrap_or_else(|| "?".to_string());
        let _ = write!(
            out,
            "\n  {} [{}] {:?} {} \"{}\" seen={}",
            t.chat_id, t.mode, t.phase, teams, t.group_label, t.seen_events
        );
        if t.buffered_events > 0 {
            let _ = write!(out, " buffered={}", t.buffered_events);
        }
        if let Some(start) = t.start_time {
            let _ = write!(out, " starts={}", start.format("%Y-%m-%d %H:%M UTC"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use liveticker_core::TeamNames;
    use liveticker_engine::{TickerPhase, TickerSummary};

    #[test]
    fn start_takes_trailing_mode_and_multiword_label() {
        assert_eq!(
            parse_command("start -42 https://feed.example/7 Cup final recap").unwrap(),
            Some(Command::Start {
                chat_id: "-42".to_string(),
                url: "https://feed.example/7".to_string(),
                label: "Cup final".to_string(),
                mode: TickerMode::Recap,
            })
        );
        assert_eq!(
            parse_command("START c1 https://feed.example/7").unwrap(),
            Some(Command::Start {
                chat_id: "c1".to_string(),
                url: "https://feed.example/7".to_string(),
                label: String::new(),
                mode: TickerMode::Live,
            })
        );
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert_eq!(parse_command("   ").unwrap(), None);
        assert!(parse_command("start c1").is_err());
        assert!(parse_command("stop").is_err());
        assert!(parse_command("reset a b").is_err());
        assert!(parse_command("launch c1").is_err());
        assert_eq!(parse_command("status").unwrap(), Some(Command::Status));
        assert_eq!(parse_command("exit").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn status_lists_each_ticker() {
        let status = StatusSnapshot {
            stop_requested: false,
            active_workers: 1,
            queued_jobs: 0,
            tickers: vec![TickerSummary {
                chat_id: "c1".to_string(),
                phase: TickerPhase::Polling,
                mode: TickerMode::Recap,
                group_label: "Cup".to_string(),
                teams: Some(TeamNames {
                    home: "Kiel".to_string(),
                    guest: "Flensburg".to_string(),
                }),
                seen_events: 12,
                buffered_events: 3,
                start_time: None,
            }],
        };
        let text = format_status(&status);
        assert!(text.starts_with("workers=1 queued=0 tickers=1"));
        assert!(text.contains("c1 [recap] Polling Kiel vs Flensburg \"Cup\" seen=12 buffered=3"));
    }
}
