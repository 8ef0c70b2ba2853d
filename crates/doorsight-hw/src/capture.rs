//! Still-image capture boundary.
//!
//! A [`Capture`] writes one fresh image to a path or fails. Any previous
//! image at that path is removed first, so a failed capture can never leave a
//! stale photo that looks like a new one.

use crate::camera::CameraError;
use crate::frame::FrameError;
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Extra time allowed past the camera timeout before the process is killed.
const PROCESS_GRACE: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("{program} did not finish within {after:?}")]
    TimedOut { program: String, after: Duration },
    #[error("capture produced no image at {0}")]
    MissingOutput(PathBuf),
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolution and exposure timeout for one still.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub timeout_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            timeout_ms: 1000,
        }
    }
}

/// Produces a still image file.
pub trait Capture {
    fn capture(&mut self, output: &Path) -> Result<(), CaptureError>;
}

impl<T: Capture + ?Sized> Capture for Box<T> {
    fn capture(&mut self, output: &Path) -> Result<(), CaptureError> {
        (**self).capture(output)
    }
}

/// Create the parent directory and remove any previous image.
pub(crate) fn prepare_output(output: &Path) -> Result<(), CaptureError> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::remove_file(output) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Fail unless a non-empty file exists at `output`.
pub(crate) fn verify_output(output: &Path) -> Result<(), CaptureError> {
    match std::fs::metadata(output) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        _ => Err(CaptureError::MissingOutput(output.to_path_buf())),
    }
}

/// Captures through the `libcamera-still` command-line tool.
pub struct LibcameraStill {
    program: String,
    settings: CaptureSettings,
    grace: Duration,
}

impl LibcameraStill {
    pub fn new(program: impl Into<String>, settings: CaptureSettings) -> Self {
        Self {
            program: program.into(),
            settings,
            grace: PROCESS_GRACE,
        }
    }

    fn args(&self, output: &Path) -> Vec<OsString> {
        let s = self.settings;
        let mut args: Vec<OsString> = vec!["-o".into(), output.as_os_str().to_owned()];
        for (flag, value) in [
            ("--width", s.width.to_string()),
            ("--height", s.height.to_string()),
            ("--timeout", s.timeout_ms.to_string()),
        ] {
            args.push(flag.into());
            args.push(value.into());
        }
        args.push("--nopreview".into());
        args
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.settings.timeout_ms) + self.grace
    }
}

impl Capture for LibcameraStill {
    fn capture(&mut self, output: &Path) -> Result<(), CaptureError> {
        prepare_output(output)?;

        let started = Instant::now();
        let mut child = Command::new(&self.program)
            .args(self.args(output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CaptureError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Drain stderr concurrently; libcamera logs enough to fill a pipe.
        let stderr = child.stderr.take();
        let drain = std::thread::spawn(move || {
            let mut text = String::new();
            if let Some(mut pipe) = stderr {
                let _ = pipe.read_to_string(&mut text);
            }
            text
        });

        let deadline = self.deadline();
        let status = loop {
            let failure = match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() < deadline => {
                    std::thread::sleep(POLL_INTERVAL);
                    continue;
                }
                Ok(None) => CaptureError::TimedOut {
                    program: self.program.clone(),
                    after: deadline,
                },
                Err(e) => CaptureError::Io(e),
            };
            let _ = child.kill();
            let _ = child.wait();
            let _ = drain.join();
            return Err(failure);
        };
        let stderr = drain.join().unwrap_or_default();

        if !status.success() {
            return Err(CaptureError::Failed {
                program: self.program.clone(),
                status,
                stderr: tail(&stderr, 3),
            });
        }

        verify_output(output)?;
        tracing::debug!(
            path = %output.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "libcamera still captured"
        );
        Ok(())
    }
}

/// Last `n` non-empty lines of process output.
fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(n)..].join(" | ")
}
