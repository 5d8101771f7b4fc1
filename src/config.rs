#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_DOWNLOAD_DIR: &str = "./downloads";
pub const DEFAULT_LEDGER_FILE: &str = "downloaded_videos.txt";
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_YT_DLP_BIN: &str = "yt-dlp";
pub const DEFAULT_FFMPEG_BIN: &str = "ffmpeg";

/// Everything a run needs. Built once at startup and never mutated.
#[derive(Clone)]
pub struct Settings {
    pub api_key: String,
    pub channel_id: String,
    pub download_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub page_size: u32,
    pub http_timeout: Duration,
    pub api_base_url: String,
    pub yt_dlp_bin: PathBuf,
    pub ffmpeg_bin: PathBuf,
}

// The API key never appears in debug output.
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &"<redacted>")
            .field("channel_id", &self.channel_id)
            .field("download_dir", &self.download_dir)
            .field("ledger_path", &self.ledger_path)
            .field("page_size", &self.page_size)
            .field("http_timeout", &self.http_timeout)
            .field("api_base_url", &self.api_base_url)
            .field("yt_dlp_bin", &self.yt_dlp_bin)
            .field("ffmpeg_bin", &self.ffmpeg_bin)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub channel_id: Option<String>,
    pub download_dir: Option<PathBuf>,
    pub ledger_path: Option<PathBuf>,
    pub page_size: Option<u32>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    build_settings(&file_vars, env_var_string, overrides)
}

fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Result<Settings> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let api_key = lookup("API_KEY").ok_or_else(|| anyhow!("API_KEY not set"))?;
    let channel_id = overrides
        .channel_id
        .and_then(non_blank)
        .or_else(|| lookup("CHANNEL_ID"))
        .ok_or_else(|| anyhow!("CHANNEL_ID not set"))?;
    let download_dir = overrides
        .download_dir
        .or_else(|| lookup("DOWNLOAD_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR));
    let ledger_path = overrides
        .ledger_path
        .or_else(|| lookup("TRACK_FILE").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LEDGER_FILE));
    let page_size = overrides
        .page_size
        .or_else(|| lookup("PAGE_SIZE").and_then(|value| value.parse::<u32>().ok()))
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let http_timeout = lookup("HTTP_TIMEOUT_SECS")
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
    let api_base_url = lookup("API_BASE_URL")
        .map(|value| value.trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
    let yt_dlp_bin = lookup("YT_DLP_BIN").unwrap_or_else(|| DEFAULT_YT_DLP_BIN.to_string());
    let ffmpeg_bin = lookup("FFMPEG_BIN").unwrap_or_else(|| DEFAULT_FFMPEG_BIN.to_string());

    Ok(Settings {
        api_key,
        channel_id,
        download_dir,
        ledger_path,
        page_size,
        http_timeout: Duration::from_secs(http_timeout),
        api_base_url,
        yt_dlp_bin: PathBuf::from(yt_dlp_bin),
        ffmpeg_bin: PathBuf::from(ffmpeg_bin),
    })
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_blank)
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned().and_then(non_blank))
}

/// Reads `KEY=value` pairs. A missing file is not an error; the process
/// environment may carry everything.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
