//! Bot credentials and optional service endpoints, kept in the user's config dir.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::paths::{self, BaseDir, DirError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotSettings {
    /// Chat platform bot token (`123456:ABC…`).
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Endpoint that writes the end-of-game summary. Unset disables summaries.
    #[serde(default)]
    pub summary_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Dir(#[from] DirError),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{}: not a settings file: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("settings field `{field}`: {reason}")]
    Field { field: &'static str, reason: String },
}

fn check_bot_token(token: &str) -> Result<(), String> {
    match token.split_once(':') {
        Some((id, secret))
            if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) && !secret.is_empty() =>
        {
            Ok(())
        }
        _ => Err("expected <digits>:<secret>".to_string()),
    }
}

fn check_summary_url(url: &str) -> Result<(), String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(format!("{url:?} is not an http(s) url")),
    }
}

fn normalize_field(value: &mut Option<String>) {
    *value = value
        .take()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
}

impl BotSettings {
    fn normalize(&mut self) {
        normalize_field(&mut self.bot_token);
        normalize_field(&mut self.summary_url);
    }

    /// Report the first field that cannot be used.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let fields = [
            ("bot_token", &self.bot_token, check_bot_token as fn(&str) -> Result<(), String>),
            ("summary_url", &self.summary_url, check_summary_url),
        ];
        for (field, value, check) in fields {
            if let Some(value) = value {
                check(value).map_err(|reason| SettingsError::Field { field, reason })?;
            }
        }
        Ok(())
    }

    /// Fill unset fields from `file` (CLI/env take precedence over the file).
    pub fn merged_over(mut self, file: &BotSettings) -> BotSettings {
        self.normalize();
        self.bot_token = self.bot_token.or_else(|| file.bot_token.clone());
        self.summary_url = self.summary_url.or_else(|| file.summary_url.clone());
        self
    }
}

pub fn settings_path() -> Result<PathBuf, DirError> {
    Ok(paths::app_dir(BaseDir::Config)?.join("config.json"))
}

/// `Ok(None)` when no file exists yet.
fn read_settings(path: &Path) -> Result<Option<BotSettings>, SettingsError> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SettingsError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let mut settings: BotSettings =
        serde_json::from_slice(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    settings.normalize();
    settings.validate()?;
    Ok(Some(settings))
}

fn write_settings(path: &Path, settings: &BotSettings) -> Result<(), SettingsError> {
    let mut settings = settings.clone();
    settings.normalize();
    settings.validate()?;
    let json = serde_json::to_vec_pretty(&settings).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    paths::replace_file(path, &json).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_settings() -> Result<Option<BotSettings>, SettingsError> {
    read_settings(&settings_path()?)
}

pub fn save_settings(settings: &BotSettings) -> Result<(), SettingsError> {
    write_settings(&settings_path()?, settings)
}

/// Load the settings file, asking for the values on an interactive first run
/// or when the stored file is unusable.
///
/// Returns `Ok(None)` when nothing is stored and no prompt is possible.
pub fn ensure_settings(interactive: bool) -> anyhow::Result<Option<BotSettings>> {
    match load_settings() {
        Ok(Some(settings)) => return Ok(Some(settings)),
        Ok(None) => {}
        Err(err @ SettingsError::Dir(_)) => return Err(err.into()),
        Err(err) if !interactive => return Err(err.into()),
        Err(err) => warn!("{err}; asking again"),
    }
    if !interactive {
        return Ok(None);
    }

    let path = settings_path()?;
    println!("First-run setup (saved to {}).", path.display());
    println!("Press ENTER to leave a field empty.");
    let mut input = std::io::stdin().lock();
    let settings = BotSettings {
        bot_token: ask(&mut input, "Bot token", check_bot_token)?,
        summary_url: ask(&mut input, "Summary service URL", check_summary_url)?,
    };
    write_settings(&path, &settings)?;
    Ok(Some(settings))
}

/// Ask until `check` accepts the answer. Empty input or EOF means unset.
fn ask(
    input: &mut impl std::io::BufRead,
    label: &str,
    check: fn(&str) -> Result<(), String>,
) -> anyhow::Result<Option<String>> {
    let mut out = std::io::stdout();
    loop {
        write!(out, "{label}: ")?;
        out.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let value = line.trim();
        if value.is_empty() {
            return Ok(None);
        }
        match check(value) {
            Ok(()) => return Ok(Some(value.to_string())),
            Err(reason) => writeln!(out, "{label}: {reason}")?,
        }
    }
}
