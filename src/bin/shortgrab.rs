#![forbid(unsafe_code)]

//! Run-once entry point: sweep the configured channel for new Shorts and
//! download each one. Recurring runs belong to cron or a systemd timer.

use anyhow::{Context, Result};
use clap::Parser;
use shortgrab::catalog::YouTubeDataApi;
use shortgrab::config::{Settings, SettingsOverrides, resolve_settings};
use shortgrab::logging;
use shortgrab::merge::Ffmpeg;
use shortgrab::pipeline::Pipeline;
use shortgrab::process::ensure_program_available;
use shortgrab::streams::YtDlp;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "shortgrab", version, about = "Download new Shorts from a YouTube channel")]
struct Cli {
    /// Env file holding API_KEY, CHANNEL_ID and optional paths.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Channel to sweep instead of CHANNEL_ID.
    #[arg(long)]
    channel_id: Option<String>,

    /// Where merged videos land (DOWNLOAD_PATH).
    #[arg(long, value_name = "DIR")]
    download_dir: Option<PathBuf>,

    /// Ledger of already downloaded ids (TRACK_FILE).
    #[arg(long, value_name = "PATH")]
    ledger: Option<PathBuf>,

    /// Items requested per catalog page, 1 to 100.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=100))]
    page_size: Option<u32>,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            channel_id: self.channel_id.clone(),
            download_dir: self.download_dir.clone(),
            ledger_path: self.ledger.clone(),
            page_size: self.page_size,
            env_path: self.env_file.clone(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let settings = resolve_settings(cli.overrides()).context("loading configuration")?;

    ensure_program_available(&settings.yt_dlp_bin, "--version")?;
    ensure_program_available(&settings.ffmpeg_bin, "-version")?;

    print_banner(&settings);

    let metadata = YouTubeDataApi::new(
        settings.api_base_url.clone(),
        settings.api_key.clone(),
        settings.http_timeout,
    );
    let source = YtDlp::new(settings.yt_dlp_bin.clone(), settings.http_timeout);
    let merger = Ffmpeg::new(settings.ffmpeg_bin.clone());

    let report = Pipeline::new(settings, &metadata, &source, &merger)
        .run()
        .context("checking for new Shorts")?;

    println!();
    println!("Run complete: {report}");
    Ok(())
}

fn print_banner(settings: &Settings) {
    println!("===================================");
    println!("Shorts Downloader");
    println!("===================================");
    println!("Channel: {}", settings.channel_id);
    println!("Downloads: {}", settings.download_dir.display());
    println!("Ledger: {}", settings.ledger_path.display());
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_maps_flags_to_overrides() {
        let cli = Cli::try_parse_from([
            "shortgrab",
            "--env-file",
            "/etc/shortgrab.env",
            "--channel-id",
            "UCabc",
            "--download-dir",
            "/srv/shorts",
            "--ledger",
            "/srv/shorts/ledger.txt",
            "--page-size",
            "25",
        ])
        .unwrap();
        let overrides = cli.overrides();
        assert_eq!(overrides.env_path, Some(PathBuf::from("/etc/shortgrab.env")));
        assert_eq!(overrides.channel_id.as_deref(), Some("UCabc"));
        assert_eq!(overrides.download_dir, Some(PathBuf::from("/srv/shorts")));
        assert_eq!(
            overrides.ledger_path,
            Some(PathBuf::from("/srv/shorts/ledger.txt"))
        );
        assert_eq!(overrides.page_size, Some(25));
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn cli_rejects_oversized_pages() {
        assert!(Cli::try_parse_from(["shortgrab", "--page-size", "500"]).is_err());
    }

    #[test]
    fn cli_without_flags_has_no_overrides() {
        let overrides = Cli::try_parse_from(["shortgrab"]).unwrap().overrides();
        assert!(overrides.channel_id.is_none());
        assert!(overrides.download_dir.is_none());
        assert!(overrides.page_size.is_none());
    }
}
