#![forbid(unsafe_code)]

//! Per-video acquisition: pick streams, download both into a scoped staging
//! directory, merge, clean up, and only then record the id in the ledger.
//!
//! Every path out of [`Acquirer::acquire`] is an [`Outcome`]; nothing here
//! returns an error to the caller, so one bad video cannot stop a batch.

use std::fmt;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;

use crate::catalog::VideoRef;
use crate::ledger::{DedupLedger, LedgerError};
use crate::merge::{MergeError, Merger};
use crate::streams::{ExtractError, StreamDescriptor, StreamKind, StreamPreference, StreamSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    StreamsSelected,
    Downloading,
    Merged,
    Committed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Pending => "pending",
            Stage::StreamsSelected => "streams-selected",
            Stage::Downloading => "downloading",
            Stage::Merged => "merged",
            Stage::Committed => "committed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingStream {
    Video,
    Audio,
    Both,
}

impl fmt::Display for MissingStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MissingStream::Video => "no video-only stream",
            MissingStream::Audio => "no audio-only stream",
            MissingStream::Both => "no video-only or audio-only stream",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSelection {
    pub video: StreamDescriptor,
    pub audio: StreamDescriptor,
}

#[derive(Debug)]
pub enum Outcome {
    Committed { output: PathBuf },
    /// Another caller recorded the id between the caller's check and ours.
    AlreadyCommitted { output: PathBuf },
    StreamsUnavailable(MissingStream),
    DownloadFailed(ExtractError),
    MergeFailed(MergeError),
    LedgerWriteFailed(LedgerError),
    Unexpected { stage: Stage, cause: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Outcome::Committed { .. } | Outcome::AlreadyCommitted { .. }
        )
    }

    /// The last stage the video reached before this outcome.
    pub fn stage(&self) -> Stage {
        match self {
            Outcome::Committed { .. } | Outcome::AlreadyCommitted { .. } => Stage::Committed,
            Outcome::StreamsUnavailable(_) => Stage::Pending,
            Outcome::DownloadFailed(_) => Stage::Downloading,
            Outcome::MergeFailed(_) => Stage::Downloading,
            Outcome::LedgerWriteFailed(_) => Stage::Merged,
            Outcome::Unexpected { stage, .. } => *stage,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Committed { output } => write!(f, "saved to {}", output.display()),
            Outcome::AlreadyCommitted { output } => {
                write!(f, "already recorded, output at {}", output.display())
            }
            Outcome::StreamsUnavailable(missing) => write!(f, "no suitable streams: {missing}"),
            Outcome::DownloadFailed(err) => write!(f, "download failed: {err}"),
            Outcome::MergeFailed(err) => write!(f, "merge failed: {err}"),
            Outcome::LedgerWriteFailed(err) => write!(f, "ledger write failed: {err}"),
            Outcome::Unexpected { stage, cause } => {
                write!(f, "unexpected failure while {stage}: {cause}")
            }
        }
    }
}

/// Best video-only stream in the preferred container and best audio-only
/// stream in an accepted container.
pub fn select_streams(
    streams: &[StreamDescriptor],
    preference: &StreamPreference,
) -> Result<StreamSelection, MissingStream> {
    let video = streams
        .iter()
        .filter(|s| s.kind == StreamKind::VideoOnly)
        .filter(|s| s.container.eq_ignore_ascii_case(&preference.video_container))
        .max_by(|a, b| {
            a.height
                .unwrap_or(0)
                .cmp(&b.height.unwrap_or(0))
                .then_with(|| bitrate(a).total_cmp(&bitrate(b)))
        });
    let audio = streams
        .iter()
        .filter(|s| s.kind == StreamKind::AudioOnly)
        .filter(|s| {
            preference
                .audio_containers
                .iter()
                .any(|c| s.container.eq_ignore_ascii_case(c))
        })
        .max_by(|a, b| bitrate(a).total_cmp(&bitrate(b)));

    match (video, audio) {
        (Some(video), Some(audio)) => Ok(StreamSelection {
            video: video.clone(),
            audio: audio.clone(),
        }),
        (None, Some(_)) => Err(MissingStream::Video),
        (Some(_), None) => Err(MissingStream::Audio),
        (None, None) => Err(MissingStream::Both),
    }
}

fn bitrate(stream: &StreamDescriptor) -> f64 {
    stream.bitrate_kbps.unwrap_or(0.0)
}

/// Local copies of both streams. Dropping this removes the staging
/// directory and everything in it.
pub struct StagedStreams {
    staging: TempDir,
    pub video: PathBuf,
    pub audio: PathBuf,
}

impl StagedStreams {
    pub fn dir(&self) -> &Path {
        self.staging.path()
    }

    /// Removes the staging directory now and reports whether that worked.
    pub fn close(self) -> io::Result<()> {
        self.staging.close()
    }
}

pub struct Acquirer<'a> {
    source: &'a dyn StreamSource,
    merger: &'a dyn Merger,
    download_dir: PathBuf,
    preference: StreamPreference,
}

impl<'a> Acquirer<'a> {
    pub fn new(
        source: &'a dyn StreamSource,
        merger: &'a dyn Merger,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            merger,
            download_dir: download_dir.into(),
            preference: StreamPreference::default(),
        }
    }

    pub fn output_path(&self, video_id: &str) -> PathBuf {
        self.download_dir
            .join(format!("{video_id}.{}", self.preference.video_container))
    }

    /// Runs the whole sequence for one video. Panics from collaborators are
    /// contained and reported as [`Outcome::Unexpected`].
    pub fn acquire(&self, video: &VideoRef, ledger: &DedupLedger) -> Outcome {
        let mut stage = Stage::Pending;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.acquire_inner(video, ledger, &mut stage)
        }));
        match result {
            Ok(outcome) => outcome,
            Err(payload) => Outcome::Unexpected {
                stage,
                cause: panic_message(payload.as_ref()),
            },
        }
    }

    fn acquire_inner(&self, video: &VideoRef, ledger: &DedupLedger, stage: &mut Stage) -> Outcome {
        let streams = match self.source.streams(video) {
            Ok(streams) => streams,
            Err(err) => {
                return Outcome::Unexpected {
                    stage: *stage,
                    cause: err.to_string(),
                };
            }
        };
        let selection = match select_streams(&streams, &self.preference) {
            Ok(selection) => selection,
            Err(missing) => return Outcome::StreamsUnavailable(missing),
        };
        *stage = Stage::StreamsSelected;
        tracing::debug!(
            video_id = %video.id,
            video_format = %selection.video.format_id,
            height = ?selection.video.height,
            audio_format = %selection.audio.format_id,
            abr = ?selection.audio.bitrate_kbps,
            "selected streams"
        );

        *stage = Stage::Downloading;
        let staged = match self.download(video, &selection) {
            Ok(staged) => staged,
            Err(DownloadError::Staging(err)) => {
                return Outcome::Unexpected {
                    stage: *stage,
                    cause: format!(
                        "creating staging directory in {}: {err}",
                        self.download_dir.display()
                    ),
                };
            }
            Err(DownloadError::Extract(err)) => return Outcome::DownloadFailed(err),
        };

        let output = self.output_path(&video.id);
        if let Err(err) = self.merge(&staged, &output) {
            // `staged` drops here and takes the temporary files and any
            // partial merge with it.
            return Outcome::MergeFailed(err);
        }
        *stage = Stage::Merged;

        let staging_dir = staged.dir().to_path_buf();
        if let Err(err) = staged.close() {
            return Outcome::Unexpected {
                stage: *stage,
                cause: format!("removing {}: {err}", staging_dir.display()),
            };
        }

        match ledger.commit(&video.id) {
            Ok(true) => {
                *stage = Stage::Committed;
                Outcome::Committed { output }
            }
            Ok(false) => {
                *stage = Stage::Committed;
                Outcome::AlreadyCommitted { output }
            }
            Err(err) => Outcome::LedgerWriteFailed(err),
        }
    }

    /// Materializes both streams under a fresh directory keyed by video id.
    pub fn download(
        &self,
        video: &VideoRef,
        selection: &StreamSelection,
    ) -> Result<StagedStreams, DownloadError> {
        let staging = tempfile::Builder::new()
            .prefix(&format!("{}-", video.id))
            .tempdir_in(&self.download_dir)
            .map_err(DownloadError::Staging)?;

        let video_path = staging.path().join(format!(
            "{}_video.{}",
            video.id, selection.video.container
        ));
        let audio_path = staging.path().join(format!(
            "{}_audio.{}",
            video.id, selection.audio.container
        ));

        tracing::info!(video_id = %video.id, title = %video.title, "downloading video stream");
        self.source
            .materialize(video, &selection.video, &video_path)?;
        tracing::info!(video_id = %video.id, title = %video.title, "downloading audio stream");
        self.source
            .materialize(video, &selection.audio, &audio_path)?;

        Ok(StagedStreams {
            staging,
            video: video_path,
            audio: audio_path,
        })
    }

    /// Merges staged streams inside the staging directory and moves the
    /// result onto `output` only once the merge succeeded. A failed merge
    /// leaves whatever was already at `output` untouched.
    pub fn merge(&self, staged: &StagedStreams, output: &Path) -> Result<(), MergeError> {
        let merged = match output.file_name() {
            Some(name) => staged.dir().join(name),
            None => staged.dir().join("merged"),
        };
        self.merger.merge(&staged.video, &staged.audio, &merged)?;
        fs::rename(&merged, output).map_err(|source| MergeError::Install {
            output: output.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("creating staging directory: {0}")]
    Staging(#[source] io::Error),
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_owned()
    }
}
