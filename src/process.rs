#![forbid(unsafe_code)]

//! Small helpers shared by the yt-dlp and ffmpeg adapters.

use anyhow::{Result, bail};
use std::path::Path;
use std::process::{Command, Stdio};

const STDERR_TAIL_LINES: usize = 20;

/// Runs `<program> <version_flag>` to fail loudly when a required tool is
/// missing, before any network traffic happens.
pub fn ensure_program_available(program: &Path, version_flag: &str) -> Result<()> {
    let status = Command::new(program)
        .arg(version_flag)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(_) => bail!(
            "{} is installed but returned a failure status",
            program.display()
        ),
        Err(err) => bail!("{} is not installed or not in PATH: {}", program.display(), err),
    }
}

/// Last few non-empty lines of a tool's stderr; enough to diagnose a failure
/// without flooding the log.
pub fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
