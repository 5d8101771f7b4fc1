#![forbid(unsafe_code)]

//! One sweep of a channel: load the ledger, walk the uploads collection, and
//! hand every new short to the acquisition engine.

use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::acquire::{Acquirer, Outcome};
use crate::catalog::{
    CatalogEntry, CatalogError, CatalogWalker, MetadataService, resolve_uploads_collection,
};
use crate::classify::{is_short, total_seconds};
use crate::config::Settings;
use crate::ledger::{DedupLedger, LedgerError};
use crate::merge::Merger;
use crate::streams::StreamSource;

/// Failures that end the run. Per-video problems never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("creating download directory {path}: {source}")]
    DownloadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub scanned: usize,
    pub shorts: usize,
    pub not_short: usize,
    pub missing_details: usize,
    pub already_known: usize,
    pub acquired: usize,
    pub failed: usize,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned {} uploads: {} shorts ({} new, {} already downloaded, {} failed), \
             {} not shorts, {} without details",
            self.scanned,
            self.shorts,
            self.acquired,
            self.already_known,
            self.failed,
            self.not_short,
            self.missing_details
        )
    }
}

pub struct Pipeline<'a> {
    settings: Settings,
    metadata: &'a dyn MetadataService,
    source: &'a dyn StreamSource,
    merger: &'a dyn Merger,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        settings: Settings,
        metadata: &'a dyn MetadataService,
        source: &'a dyn StreamSource,
        merger: &'a dyn Merger,
    ) -> Self {
        Self {
            settings,
            metadata,
            source,
            merger,
        }
    }

    /// Returns once the whole catalog has been walked.
    pub fn run(&self) -> Result<RunReport, PipelineError> {
        let download_dir = &self.settings.download_dir;
        fs::create_dir_all(download_dir).map_err(|source| PipelineError::DownloadDir {
            path: download_dir.clone(),
            source,
        })?;

        let ledger = DedupLedger::load(&self.settings.ledger_path)?;
        tracing::info!(
            count = ledger.len(),
            path = %ledger.path().display(),
            "loaded downloaded ids"
        );

        let collection = resolve_uploads_collection(self.metadata, &self.settings.channel_id)?;
        tracing::info!(
            channel = %self.settings.channel_id,
            %collection,
            "checking for new shorts"
        );

        let acquirer = Acquirer::new(self.source, self.merger, download_dir);
        let mut report = RunReport::default();
        for entry in CatalogWalker::new(self.metadata, collection, self.settings.page_size) {
            let entry = entry?;
            report.scanned += 1;
            process_entry(entry, &ledger, &acquirer, &mut report);
        }

        Ok(report)
    }
}

fn process_entry(
    entry: CatalogEntry,
    ledger: &DedupLedger,
    acquirer: &Acquirer<'_>,
    report: &mut RunReport,
) {
    let CatalogEntry { video, duration } = entry;

    let Some(duration) = duration else {
        report.missing_details += 1;
        tracing::warn!(
            video_id = %video.id,
            title = %video.title,
            "could not retrieve video details"
        );
        return;
    };

    if !is_short(&duration) {
        report.not_short += 1;
        tracing::info!(
            video_id = %video.id,
            title = %video.title,
            %duration,
            "not a short"
        );
        return;
    }

    report.shorts += 1;
    tracing::info!(
        video_id = %video.id,
        title = %video.title,
        %duration,
        seconds = ?total_seconds(&duration),
        "identified short"
    );

    if ledger.contains(&video.id) {
        report.already_known += 1;
        tracing::info!(video_id = %video.id, "already downloaded");
        return;
    }

    let outcome = acquirer.acquire(&video, ledger);
    match &outcome {
        Outcome::Committed { output } => {
            report.acquired += 1;
            tracing::info!(
                video_id = %video.id,
                title = %video.title,
                output = %output.display(),
                "downloaded and combined"
            );
        }
        Outcome::AlreadyCommitted { .. } => {
            report.already_known += 1;
            tracing::info!(video_id = %video.id, "already downloaded");
        }
        Outcome::StreamsUnavailable(missing) => {
            report.failed += 1;
            tracing::warn!(
                video_id = %video.id,
                title = %video.title,
                %missing,
                "no suitable streams found"
            );
        }
        Outcome::DownloadFailed(_)
        | Outcome::MergeFailed(_)
        | Outcome::LedgerWriteFailed(_)
        | Outcome::Unexpected { .. } => {
            report.failed += 1;
            tracing::warn!(
                video_id = %video.id,
                title = %video.title,
                stage = %outcome.stage(),
                error = %outcome,
                "acquisition failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::testing::{FakeMerger, FakeSource, stream};
    use crate::catalog::testing::FakeCatalog;
    use crate::streams::StreamKind;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    fn settings(root: &Path, page_size: u32) -> Settings {
        Settings {
            api_key: "test-key".into(),
            channel_id: "UCchannel".into(),
            download_dir: root.join("downloads"),
            ledger_path: root.join("downloaded_videos.txt"),
            page_size,
            http_timeout: Duration::from_secs(5),
            api_base_url: "http://127.0.0.1:9".into(),
            yt_dlp_bin: PathBuf::from("yt-dlp"),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
        }
    }

    fn ledger_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn acquires_only_shorts() {
        let dir = tempdir().unwrap();
        let catalog = FakeCatalog::new(&[
            ("s1", "First short", Some("PT45S")),
            ("long", "Long video", Some("PT2M10S")),
            ("s2", "Second short", Some("PT30S")),
        ]);
        let source = FakeSource::default();
        let merger = FakeMerger::default();
        let settings = settings(dir.path(), 50);
        let ledger_path = settings.ledger_path.clone();

        let report = Pipeline::new(settings, &catalog, &source, &merger)
            .run()
            .unwrap();

        assert_eq!(*source.listed.borrow(), ["s1", "s2"]);
        assert_eq!(ledger_lines(&ledger_path), ["s1", "s2"]);
        assert_eq!(report.scanned, 3);
        assert_eq!(report.shorts, 2);
        assert_eq!(report.not_short, 1);
        assert_eq!(report.acquired, 2);
        assert!(dir.path().join("downloads/s1.mp4").is_file());
        assert!(!dir.path().join("downloads/long.mp4").exists());
    }

    #[test]
    fn second_run_acquires_nothing() {
        let dir = tempdir().unwrap();
        let catalog = FakeCatalog::new(&[
            ("s1", "First short", Some("PT45S")),
            ("s2", "Second short", Some("PT30S")),
        ]);
        let source = FakeSource::default();
        let merger = FakeMerger::default();

        Pipeline::new(settings(dir.path(), 50), &catalog, &source, &merger)
            .run()
            .unwrap();
        assert_eq!(source.listed.borrow().len(), 2);

        let report = Pipeline::new(settings(dir.path(), 50), &catalog, &source, &merger)
            .run()
            .unwrap();
        assert_eq!(source.listed.borrow().len(), 2);
        assert_eq!(report.acquired, 0);
        assert_eq!(report.already_known, 2);
    }

    #[test]
    fn missing_audio_stream_leaves_ledger_untouched() {
        let dir = tempdir().unwrap();
        let catalog = FakeCatalog::new(&[
            ("noaudio", "Silent", Some("PT20S")),
            ("s2", "Second short", Some("PT30S")),
        ]);
        let source = FakeSource::default().with_listing(
            "noaudio",
            vec![stream("137", StreamKind::VideoOnly, Some(1080), 1379.0, "mp4")],
        );
        let merger = FakeMerger::default();
        let settings = settings(dir.path(), 50);
        let ledger_path = settings.ledger_path.clone();

        let report = Pipeline::new(settings, &catalog, &source, &merger)
            .run()
            .unwrap();

        // Only s2 reached the download step.
        assert_eq!(source.download_count(), 2);
        assert_eq!(ledger_lines(&ledger_path), ["s2"]);
        assert_eq!(report.failed, 1);
        assert_eq!(report.acquired, 1);
    }

    #[test]
    fn known_ids_are_skipped() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path(), 50);
        fs::write(&settings.ledger_path, "s1\n").unwrap();
        let catalog = FakeCatalog::new(&[
            ("s1", "First short", Some("PT45S")),
            ("s2", "Second short", Some("PT30S")),
        ]);
        let source = FakeSource::default();
        let merger = FakeMerger::default();
        let ledger_path = settings.ledger_path.clone();

        let report = Pipeline::new(settings, &catalog, &source, &merger)
            .run()
            .unwrap();

        assert_eq!(*source.listed.borrow(), ["s2"]);
        assert_eq!(ledger_lines(&ledger_path), ["s1", "s2"]);
        assert_eq!(report.already_known, 1);
    }

    #[test]
    fn one_failure_does_not_stop_the_batch() {
        let dir = tempdir().unwrap();
        let catalog = FakeCatalog::new(&[
            ("a", "A", Some("PT10S")),
            ("b", "B", Some("PT11S")),
            ("c", "C", Some("PT12S")),
            ("d", "D", Some("PT13S")),
            ("e", "E", Some("PT14S")),
        ]);
        let mut source = FakeSource::default();
        source.fail_download.insert("b".into());
        source.panic_on.insert("d".into());
        let mut merger = FakeMerger::default();
        merger.fail_for.insert("c".into());
        let settings = settings(dir.path(), 2);
        let ledger_path = settings.ledger_path.clone();

        let report = Pipeline::new(settings, &catalog, &source, &merger)
            .run()
            .unwrap();

        assert_eq!(*source.listed.borrow(), ["a", "b", "c", "d", "e"]);
        assert_eq!(ledger_lines(&ledger_path), ["a", "e"]);
        assert_eq!(report.acquired, 2);
        assert_eq!(report.failed, 3);
    }

    #[test]
    fn entries_without_details_are_skipped() {
        let dir = tempdir().unwrap();
        let catalog = FakeCatalog::new(&[("gone", "Deleted", None), ("s1", "Short", Some("PT5S"))]);
        let source = FakeSource::default();
        let merger = FakeMerger::default();

        let report = Pipeline::new(settings(dir.path(), 50), &catalog, &source, &merger)
            .run()
            .unwrap();

        assert_eq!(report.missing_details, 1);
        assert_eq!(*source.listed.borrow(), ["s1"]);
    }

    #[test]
    fn unresolvable_channel_is_fatal() {
        let dir = tempdir().unwrap();
        let mut catalog = FakeCatalog::new(&[("s1", "Short", Some("PT5S"))]);
        catalog.uploads = None;
        let source = FakeSource::default();
        let merger = FakeMerger::default();

        let err = Pipeline::new(settings(dir.path(), 50), &catalog, &source, &merger)
            .run()
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Catalog(CatalogError::NotFound(_))
        ));
        assert!(source.listed.borrow().is_empty());
        // The download directory is prepared before the catalog is touched.
        assert!(dir.path().join("downloads").is_dir());
    }

    #[test]
    fn catalog_error_aborts_after_earlier_pages() {
        let dir = tempdir().unwrap();
        let mut catalog = FakeCatalog::new(&[
            ("a", "A", Some("PT10S")),
            ("b", "B", Some("PT11S")),
            ("c", "C", Some("PT12S")),
        ]);
        catalog.fail_page = Some(1);
        let source = FakeSource::default();
        let merger = FakeMerger::default();
        let settings = settings(dir.path(), 2);
        let ledger_path = settings.ledger_path.clone();

        let err = Pipeline::new(settings, &catalog, &source, &merger)
            .run()
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Catalog(CatalogError::Status { status: 500, .. })
        ));
        assert_eq!(ledger_lines(&ledger_path), ["a", "b"]);
    }

    #[test]
    fn report_summarises_counts() {
        let report = RunReport {
            scanned: 5,
            shorts: 3,
            not_short: 1,
            missing_details: 1,
            already_known: 1,
            acquired: 1,
            failed: 1,
        };
        assert_eq!(
            report.to_string(),
            "scanned 5 uploads: 3 shorts (1 new, 1 already downloaded, 1 failed), \
             1 not shorts, 1 without details"
        );
    }
}
