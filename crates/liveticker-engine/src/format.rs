//! Chat message rendering (Telegram HTML subset).

use chrono::{DateTime, Utc};
use liveticker_core::{Event, EventKind, Side, TeamNames, TickerMode, parse_score};

use crate::processor::is_game_end;

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn icon(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Goal => "⚽",
        EventKind::SevenMeterGoal => "🎯",
        EventKind::SevenMeterMiss => "❌",
        EventKind::Penalty => "⏱️",
        EventKind::YellowCard => "🟨",
        EventKind::RedCard => "🟥",
        EventKind::Timeout => "⏸️",
        EventKind::PeriodStart => "🟢",
        EventKind::PeriodEnd => "🔴",
        EventKind::Other => "ℹ️",
    }
}

fn label(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Goal => "Goal",
        EventKind::SevenMeterGoal => "7m goal",
        EventKind::SevenMeterMiss => "7m missed",
        EventKind::Penalty => "2-minute penalty",
        EventKind::YellowCard => "Yellow card",
        EventKind::RedCard => "Red card",
        EventKind::Timeout => "Team timeout",
        EventKind::PeriodStart => "Period start",
        EventKind::PeriodEnd => "Period end",
        EventKind::Other => "Info",
    }
}

/// `home:guest` with the scoring side's number in bold.
fn emphasized_score(score: &str, scorer: Option<Side>) -> String {
    match parse_score(score) {
        Some((home, guest)) => match scorer {
            Some(Side::Home) => format!("<b>{home}</b>:{guest}"),
            Some(Side::Guest) => format!("{home}:<b>{guest}</b>"),
            None => format!("{home}:{guest}"),
        },
        None => escape_html(score),
    }
}

fn plain_score(score: &str) -> String {
    match parse_score(score) {
        Some((home, guest)) => format!("{home}:{guest}"),
        None => escape_html(score),
    }
}

fn period_line(event: &Event, teams: &TeamNames, regulation_minutes: u32) -> String {
    let home = escape_html(&teams.home);
    let guest = escape_html(&teams.guest);
    match event.kind {
        EventKind::PeriodStart if event.minute().unwrap_or(0) == 0 => {
            format!("🟢 <b>Game started!</b> {home} vs {guest}")
        }
        EventKind::PeriodStart => "🟢 <b>Second half underway</b>".to_string(),
        _ if is_game_end(event, regulation_minutes) => format!(
            "🏁 <b>Full time!</b>\n{home} {} {guest}",
            plain_score(&event.score)
        ),
        _ => format!(
            "⏸️ <b>Halftime</b>\n{home} {} {guest}",
            plain_score(&event.score)
        ),
    }
}

/// One message per event in live mode.
pub(crate) fn live_message(event: &Event, teams: &TeamNames, regulation_minutes: u32) -> String {
    if event.kind.is_period_boundary() {
        return period_line(event, teams, regulation_minutes);
    }

    let team = event
        .team
        .map(|side| format!(" ({})", escape_html(teams.name(side))))
        .unwrap_or_default();
    let message = escape_html(event.message.trim());

    if event.kind.is_goal() {
        let mut line = format!(
            "{} {} | {}{team}",
            icon(event.kind),
            escape_html(&event.time),
            emphasized_score(&event.score, event.team)
        );
        if !message.is_empty() {
            line.push('\n');
            line.push_str(&message);
        }
        return line;
    }

    let mut line = format!(
        "{} {} {}{team}",
        icon(event.kind),
        escape_html(&event.time),
        label(event.kind)
    );
    if !message.is_empty() {
        line.push_str(": ");
        line.push_str(&message);
    }
    line
}

fn recap_line(event: &Event, regulation_minutes: u32) -> String {
    let text = match event.kind {
        EventKind::PeriodStart if event.minute().unwrap_or(0) == 0 => "Game started".to_string(),
        EventKind::PeriodStart => "Second half started".to_string(),
        EventKind::PeriodEnd if is_game_end(event, regulation_minutes) => "Full time".to_string(),
        EventKind::PeriodEnd => "Halftime".to_string(),
        kind if event.message.trim().is_empty() => label(kind).to_string(),
        _ => escape_html(event.message.trim()),
    };
    let score = if event.kind.is_goal() || event.kind == EventKind::PeriodEnd {
        format!(" {}", emphasized_score(&event.score, event.team.filter(|_| event.kind.is_goal())))
    } else {
        String::new()
    };
    format!("{} {}{score} {text}", escape_html(&event.time), icon(event.kind))
}

fn minute_range(events: &[Event]) -> Option<String> {
    let first = events.first()?.minute()?;
    let last = events.last()?.minute()?;
    if first == last {
        Some(format!("{first}'"))
    } else {
        Some(format!("{first}'–{last}'"))
    }
}

/// A batch of buffered events as one message. `events` must be chronological.
pub(crate) fn recap_message(
    events: &[Event],
    teams: &TeamNames,
    regulation_minutes: u32,
) -> String {
    let mut out = format!("📋 <b>{}</b>", escape_html(&teams.to_string()));
    if let Some(range) = minute_range(events) {
        out.push_str(&format!(" · {range}"));
    }
    for event in events {
        out.push('\n');
        out.push_str(&recap_line(event, regulation_minutes));
    }
    out
}

pub(crate) fn legend() -> String {
    let kinds = [
        EventKind::Goal,
        EventKind::SevenMeterGoal,
        EventKind::SevenMeterMiss,
        EventKind::Penalty,
        EventKind::YellowCard,
        EventKind::RedCard,
        EventKind::Timeout,
        EventKind::PeriodStart,
        EventKind::PeriodEnd,
    ];
    let mut out = "ℹ️ <b>Recap legend</b>".to_string();
    for kind in kinds {
        out.push_str(&format!("\n{} {}", icon(kind), label(kind)));
    }
    out.push_str("\nBold numbers mark the scoring team.");
    out
}

pub(crate) fn schedule_notice(label: &str, teams: &TeamNames, start_time: DateTime<Utc>) -> String {
    format!(
        "📅 <b>{}</b>\n{}\nLive updates start at {} UTC.",
        escape_html(label),
        escape_html(&teams.to_string()),
        start_time.format("%d.%m.%Y %H:%M")
    )
}

/// Teams are unknown for a ticker resumed from a schedule snapshot.
pub(crate) fn starting_now_notice(
    label: &str,
    teams: Option<&TeamNames>,
    mode: TickerMode,
) -> String {
    let how = match mode {
        TickerMode::Live => "Every event will be posted as it happens.",
        TickerMode::Recap => "Events will be posted as periodic recaps.",
    };
    let mut text = format!("▶️ <b>{}</b>\n", escape_html(label));
    if let Some(teams) = teams {
        text.push_str(&escape_html(&teams.to_string()));
        text.push('\n');
    }
    text.push_str("Live updates begin now. ");
    text.push_str(how);
    text
}

pub(crate) fn scheduling_failed_notice(reason: &str) -> String {
    format!(
        "⚠️ Could not set up the ticker: {}\nPlease check the link and try again.",
        escape_html(reason)
    )
}

pub(crate) fn summary_message(summary: &str) -> String {
    format!("📝 {}", escape_html(summary.trim()))
}

pub(crate) fn closing_message(teams: &TeamNames, final_score: Option<&str>) -> String {
    match final_score {
        Some(score) => format!(
            "👋 That's it from {} {} {}. Thanks for following!",
            escape_html(&teams.home),
            plain_score(score),
            escape_html(&teams.guest)
        ),
        None => format!(
            "👋 That's it from {}. Thanks for following!",
            escape_html(&teams.to_string())
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn teams() -> TeamNames {
        TeamNames {
            home: "Füchse".to_string(),
            guest: "Kiel".to_string(),
        }
    }

    fn event(kind: EventKind, time: &str, score: &str, team: Option<Side>, message: &str) -> Event {
        Event {
            id: format!("{kind:?}-{time}"),
            kind,
            time: time.to_string(),
            score: score.to_string(),
            team,
            message: message.to_string(),
            timestamp: 0,
        }
    }

    #[test]
    fn goal_bolds_the_scoring_side() {
        let home = live_message(
            &event(EventKind::Goal, "41:02", "12-11", Some(Side::Home), "Gidsel"),
            &teams(),
            30,
        );
        assert!(home.contains("<b>12</b>:11"), "{home}");
        assert!(home.contains("(Füchse)"));
        assert!(home.ends_with("\nGidsel"));

        let guest = live_message(
            &event(EventKind::SevenMeterGoal, "41:30", "12-12", Some(Side::Guest), ""),
            &teams(),
            30,
        );
        assert!(guest.contains("12:<b>12</b>"), "{guest}");
        assert!(!guest.contains('\n'));
    }

    #[test]
    fn period_boundaries_render_distinct_text() {
        let t = teams();
        let start = live_message(&event(EventKind::PeriodStart, "00:00", "", None, ""), &t, 30);
        assert!(start.contains("Game started"));
        let second = live_message(&event(EventKind::PeriodStart, "30:00", "", None, ""), &t, 30);
        assert!(second.contains("Second half"));
        let half = live_message(&event(EventKind::PeriodEnd, "30:00", "15-14", None, ""), &t, 30);
        assert!(half.contains("Halftime") && half.contains("15:14"));
        let full = live_message(&event(EventKind::PeriodEnd, "60:00", "30-28", None, ""), &t, 30);
        assert!(full.contains("Full time") && full.contains("30:28"));
    }

    #[test]
    fn other_events_are_single_line_and_escaped() {
        let line = live_message(
            &event(EventKind::Penalty, "12:00", "", Some(Side::Guest), "Pekeler <hold>"),
            &teams(),
            30,
        );
        assert_eq!(line, "⏱️ 12:00 2-minute penalty (Kiel): Pekeler &lt;hold&gt;");
    }

    #[test]
    fn recap_has_header_range_and_one_line_per_event() {
        let events = vec![
            event(EventKind::Goal, "12:10", "6-5", Some(Side::Home), "Gidsel"),
            event(EventKind::Timeout, "18:40", "", Some(Side::Guest), ""),
            event(EventKind::PeriodEnd, "30:00", "15-14", None, ""),
        ];
        let text = recap_message(&events, &teams(), 30);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "📋 <b>Füchse – Kiel</b> · 12'–30'");
        assert_eq!(lines[1], "12:10 ⚽ <b>6</b>:5 Gidsel");
        assert_eq!(lines[2], "18:40 ⏸️ Team timeout");
        assert_eq!(lines[3], "30:00 🔴 15:14 Halftime");
    }

    #[test]
    fn starting_now_notice_omits_unknown_teams() {
        let known = starting_now_notice("Cup", Some(&teams()), TickerMode::Live);
        assert!(known.contains("Füchse") && known.contains("Live updates begin now"));
        let resumed = starting_now_notice("Cup", None, TickerMode::Recap);
        assert_eq!(
            resumed,
            "▶️ <b>Cup</b>\nLive updates begin now. Events will be posted as periodic recaps."
        );
    }

    #[test]
    fn closing_message_uses_final_score() {
        let text = closing_message(&teams(), Some("30-28"));
        assert!(text.contains("Füchse 30:28 Kiel"));
    }
}
