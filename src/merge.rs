#![forbid(unsafe_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

use crate::process::stderr_tail;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("running {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("merge into {output} exited with {status}: {stderr}")]
    Failed {
        output: PathBuf,
        status: String,
        stderr: String,
    },
    #[error("moving merged file into {output}: {source}")]
    Install {
        output: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Muxes a video-only and an audio-only file into one container.
pub trait Merger {
    fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), MergeError>;
}

pub struct Ffmpeg {
    program: PathBuf,
}

impl Ffmpeg {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Merger for Ffmpeg {
    /// Copies the video track as-is and transcodes audio to AAC.
    fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), MergeError> {
        let result = Command::new(&self.program)
            .arg("-hide_banner")
            .args(["-loglevel", "error"])
            .arg("-y")
            .arg("-i")
            .arg(video)
            .arg("-i")
            .arg(audio)
            .args(["-map", "0:v:0", "-map", "1:a:0"])
            .args(["-c:v", "copy", "-c:a", "aac", "-strict", "experimental"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .output()
            .map_err(|source| MergeError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !result.status.success() {
            return Err(MergeError::Failed {
                output: output.to_path_buf(),
                status: result.status.to_string(),
                stderr: stderr_tail(&result.stderr),
            });
        }
        Ok(())
    }
}
