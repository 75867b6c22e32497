use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, error};

use super::{check_entry_name, Engine, EngineError, EngineFactory, ExecOutput};
use crate::probe::parse_duration;
use crate::progress::ProgressSink;

/// Engine backed by the native `ffmpeg` executable. Working storage is a
/// scratch directory owned by the instance.
pub struct FfmpegEngine {
    binary: PathBuf,
    background_mode: bool,
    scratch: Option<TempDir>,
}

impl FfmpegEngine {
    pub fn new(binary: impl Into<PathBuf>, background_mode: bool) -> Self {
        Self {
            binary: binary.into(),
            background_mode,
            scratch: None,
        }
    }

    /// Scratch directory, available between `load()` and `terminate()`
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(|dir| dir.path())
    }

    /// Build base FFmpeg command, deprioritized with `nice` in background mode
    fn build_base_command(&self) -> Command {
        if self.background_mode {
            let mut c = Command::new("nice");
            c.args(["-n", "19"]);
            c.arg(&self.binary);
            c
        } else {
            Command::new(&self.binary)
        }
    }

    fn entry_path(&self, name: &str) -> Result<PathBuf, EngineError> {
        check_entry_name(name)?;
        let dir = self.scratch_dir().ok_or(EngineError::NotReady)?;
        Ok(dir.join(name))
    }
}

#[async_trait]
impl Engine for FfmpegEngine {
    async fn load(&mut self) -> Result<(), EngineError> {
        if self.scratch.is_some() {
            return Ok(());
        }

        let output = Command::new(&self.binary)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                EngineError::Load(format!("cannot run {}: {e}", self.binary.display()))
            })?;
        if !output.status.success() {
            return Err(EngineError::Load(format!(
                "{} -version exited with {}",
                self.binary.display(),
                output.status
            )));
        }

        let scratch = tempfile::Builder::new()
            .prefix("condense-engine-")
            .tempdir()
            .map_err(|e| EngineError::Load(format!("cannot create working storage: {e}")))?;
        debug!("Engine loaded with working storage {:?}", scratch.path());
        self.scratch = Some(scratch);
        Ok(())
    }

    async fn write_input(&mut self, name: &str, bytes: &[u8]) -> Result<(), EngineError> {
        let path = self.entry_path(name)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn exec(
        &mut self,
        args: &[String],
        progress: &ProgressSink,
    ) -> Result<ExecOutput, EngineError> {
        let dir = self
            .scratch_dir()
            .ok_or(EngineError::NotReady)?
            .to_path_buf();

        let mut cmd = self.build_base_command();
        cmd.args(["-hide_banner", "-nostdin", "-nostats", "-progress", "pipe:1"]);
        cmd.args(args);
        cmd.current_dir(&dir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Dropping the exec future (cancellation, watchdog) kills the encoder.
        cmd.kill_on_drop(true);

        debug!("Executing FFmpeg command: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| {
            EngineError::exec(format!("cannot spawn {}: {e}", self.binary.display()), "")
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::exec("ffmpeg stdout was not captured", ""))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::exec("ffmpeg stderr was not captured", ""))?;

        let (duration_tx, duration_rx) = watch::channel(requested_duration(args));
        let diagnostics = tokio::spawn(collect_diagnostics(stderr, duration_tx));

        let (status, _) = tokio::join!(
            child.wait(),
            report_progress(stdout, duration_rx, progress)
        );
        let status = status?;
        let diagnostics = diagnostics.await.unwrap_or_default();

        if !status.success() {
            error!("FFmpeg failed with {}", status);
            return Err(EngineError::exec(
                format!("ffmpeg exited with {status}"),
                diagnostics,
            ));
        }

        progress.report(1.0);
        Ok(ExecOutput { diagnostics })
    }

    async fn read_output(&mut self, name: &str) -> Result<Vec<u8>, EngineError> {
        let path = self.entry_path(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(EngineError::MissingEntry(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_entry(&mut self, name: &str) -> Result<(), EngineError> {
        let path = self.entry_path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn terminate(&mut self) -> Result<(), EngineError> {
        if let Some(scratch) = self.scratch.take() {
            let path = scratch.path().to_path_buf();
            tokio::task::spawn_blocking(move || scratch.close())
                .await
                .map_err(|e| EngineError::Storage(e.to_string()))??;
            debug!("Engine terminated, removed {:?}", path);
        }
        Ok(())
    }
}

/// Creates [`FfmpegEngine`] instances sharing one binary and priority mode
#[derive(Debug, Clone)]
pub struct FfmpegEngineFactory {
    binary: PathBuf,
    background_mode: bool,
}

impl FfmpegEngineFactory {
    pub fn new(binary: impl Into<PathBuf>, background_mode: bool) -> Self {
        Self {
            binary: binary.into(),
            background_mode,
        }
    }
}

impl EngineFactory for FfmpegEngineFactory {
    fn create(&self) -> Box<dyn Engine> {
        Box::new(FfmpegEngine::new(self.binary.clone(), self.background_mode))
    }
}

/// Value of the output `-t` option, when the command bounds its duration
fn requested_duration(args: &[String]) -> Option<f64> {
    args.windows(2)
        .filter(|pair| pair[0] == "-t")
        .filter_map(|pair| pair[1].parse::<f64>().ok())
        .last()
}

/// Collect stderr as diagnostics, publishing the input duration once seen
async fn collect_diagnostics(
    stderr: impl AsyncRead + Unpin,
    duration: watch::Sender<Option<f64>>,
) -> String {
    let mut diagnostics = String::new();
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();

    while let Ok(n) = reader.read_until(b'\n', &mut line).await {
        if n == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        if let Some(seconds) = parse_duration(&text) {
            duration.send_if_modified(|current| {
                if current.is_none() {
                    *current = Some(seconds);
                    true
                } else {
                    false
                }
            });
        }
        diagnostics.push_str(&text);
        line.clear();
    }

    diagnostics
}

/// Translate `-progress pipe:1` key/value lines into completion ratios
async fn report_progress(
    stdout: impl AsyncRead + Unpin,
    duration: watch::Receiver<Option<f64>>,
    progress: &ProgressSink,
) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(value) = line.strip_prefix("out_time_us=") {
            let total = *duration.borrow();
            if let (Ok(micros), Some(total)) = (value.trim().parse::<f64>(), total) {
                if total > 0.0 {
                    progress.report(micros / 1_000_000.0 / total);
                }
            }
        } else if line.trim() == "progress=end" {
            progress.report(1.0);
        }
    }
}
