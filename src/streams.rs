#![forbid(unsafe_code)]

//! Stream discovery and download, backed by `yt-dlp`.

use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use thiserror::Error;

use crate::catalog::VideoRef;
use crate::process::stderr_tail;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("running {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{action} failed for {url} ({status}): {stderr}")]
    Failed {
        action: &'static str,
        url: String,
        status: String,
        stderr: String,
    },
    #[error("decoding stream listing for {url}: {message}")]
    Decode { url: String, message: String },
    #[error("stream {format_id} reported success but {path} is missing")]
    MissingOutput { format_id: String, path: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    VideoOnly,
    AudioOnly,
    Muxed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    pub format_id: String,
    pub kind: StreamKind,
    pub height: Option<u32>,
    pub bitrate_kbps: Option<f64>,
    pub container: String,
}

/// Which containers the selected streams must come in. The merge copies the
/// video track untouched, so its container decides the output container;
/// audio is transcoded and only needs to be something ffmpeg can read.
#[derive(Debug, Clone)]
pub struct StreamPreference {
    pub video_container: String,
    pub audio_containers: Vec<String>,
}

impl Default for StreamPreference {
    fn default() -> Self {
        Self {
            video_container: "mp4".into(),
            audio_containers: vec!["m4a".into(), "mp4".into(), "webm".into()],
        }
    }
}

pub trait StreamSource {
    fn streams(&self, video: &VideoRef) -> Result<Vec<StreamDescriptor>, ExtractError>;

    /// Writes one stream to exactly `dest`.
    fn materialize(
        &self,
        video: &VideoRef,
        stream: &StreamDescriptor,
        dest: &Path,
    ) -> Result<(), ExtractError>;
}

pub struct YtDlp {
    program: PathBuf,
    socket_timeout: Duration,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>, socket_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            socket_timeout,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg("--no-playlist")
            .arg("--socket-timeout")
            .arg(self.socket_timeout.as_secs().max(1).to_string());
        command
    }

    fn spawn_error(&self, source: io::Error) -> ExtractError {
        ExtractError::Spawn {
            program: self.program.display().to_string(),
            source,
        }
    }
}

impl StreamSource for YtDlp {
    fn streams(&self, video: &VideoRef) -> Result<Vec<StreamDescriptor>, ExtractError> {
        let output = self
            .command()
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg(&video.url)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| self.spawn_error(err))?;

        if !output.status.success() {
            return Err(ExtractError::Failed {
                action: "stream listing",
                url: video.url.clone(),
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        parse_formats(&output.stdout).map_err(|message| ExtractError::Decode {
            url: video.url.clone(),
            message,
        })
    }

    fn materialize(
        &self,
        video: &VideoRef,
        stream: &StreamDescriptor,
        dest: &Path,
    ) -> Result<(), ExtractError> {
        let output = self
            .command()
            .arg("--format")
            .arg(&stream.format_id)
            .arg("--output")
            .arg(dest)
            .arg("--no-part")
            .arg("--force-overwrites")
            .arg(&video.url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .output()
            .map_err(|err| self.spawn_error(err))?;

        if !output.status.success() {
            return Err(ExtractError::Failed {
                action: "stream download",
                url: video.url.clone(),
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }
        if !dest.is_file() {
            return Err(ExtractError::MissingOutput {
                format_id: stream.format_id.clone(),
                path: dest.to_path_buf(),
            });
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct InfoJson {
    #[serde(default)]
    formats: Vec<FormatInfo>,
}

#[derive(Deserialize)]
struct FormatInfo {
    format_id: Option<String>,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<i64>,
    abr: Option<f64>,
    vbr: Option<f64>,
    tbr: Option<f64>,
}

fn has_codec(codec: Option<&str>) -> bool {
    codec.is_some_and(|codec| !codec.is_empty() && codec != "none")
}

fn parse_formats(raw: &[u8]) -> Result<Vec<StreamDescriptor>, String> {
    let info: InfoJson = serde_json::from_slice(raw).map_err(|err| err.to_string())?;
    let streams = info
        .formats
        .into_iter()
        .filter_map(|format| {
            let format_id = format.format_id?.trim().to_owned();
            if format_id.is_empty() {
                return None;
            }
            let has_video = has_codec(format.vcodec.as_deref());
            let has_audio = has_codec(format.acodec.as_deref());
            // Storyboards and other image-only entries carry neither track.
            let (kind, bitrate) = match (has_video, has_audio) {
                (true, false) => (StreamKind::VideoOnly, format.vbr.or(format.tbr)),
                (false, true) => (StreamKind::AudioOnly, format.abr.or(format.tbr)),
                (true, true) => (StreamKind::Muxed, format.tbr),
                (false, false) => return None,
            };
            Some(StreamDescriptor {
                format_id,
                kind,
                height: format.height.and_then(|h| u32::try_from(h).ok()),
                bitrate_kbps: bitrate,
                container: format.ext.unwrap_or_default().to_ascii_lowercase(),
            })
        })
        .collect();
    Ok(streams)
}
