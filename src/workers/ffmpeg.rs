use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::common::cleanup::remove_stale_entries;
use crate::modules::jobs::format::MediaFormat;
use crate::modules::jobs::model::ErrorKind;

/// stderr fragments ffmpeg prints when the input itself is unusable.
const REJECTED_INPUT_MARKERS: &[&str] = &[
    "Invalid data found when processing input",
    "Unknown input format",
    "could not find codec parameters",
    "does not contain any stream",
    "Unsupported codec",
    "Output file does not contain any stream",
];

const STDERR_TAIL_BYTES: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum ToolFailure {
    #[error("tool timed out after {0:?}")]
    Timeout(Duration),

    #[error("tool exited with status {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("failed to launch tool: {0}")]
    Spawn(String),

    #[error("scratch space error: {0}")]
    Scratch(String),

    #[error("tool rejected input: {0}")]
    Rejected(String),
}

impl ToolFailure {
    pub fn is_permanent(&self) -> bool {
        matches!(self, ToolFailure::Rejected(_))
    }

    pub fn kind(&self) -> ErrorKind {
        if self.is_permanent() {
            ErrorKind::PermanentToolFailure
        } else {
            ErrorKind::TransientToolFailure
        }
    }
}

/// Turns an input payload into the output payload for its media format.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        input: Bytes,
        format: MediaFormat,
        timeout: Duration,
    ) -> Result<Bytes, ToolFailure>;
}

/// Runs ffmpeg as a child process, one scratch directory per invocation.
///
/// The child is spawned with `kill_on_drop`, and waited on inside a timeout:
/// when the timeout fires, or the calling task is cancelled, the future that
/// owns the child is dropped and the process is killed.
pub struct FfmpegTranscoder {
    program: String,
    base_args: Vec<String>,
    scratch_root: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<String>, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            scratch_root: scratch_root.into(),
        }
    }

    /// Arguments placed before the generated ffmpeg arguments.
    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Delete invocation directories older than `older_than`, left behind by
    /// a process that died mid-run.
    pub async fn sweep_scratch(&self, older_than: Duration) -> std::io::Result<usize> {
        let removed = remove_stale_entries(&self.scratch_root, older_than, |_| true).await?;
        if removed > 0 {
            info!("🧹 Removed {} abandoned scratch directories", removed);
        }
        Ok(removed)
    }

    async fn run_in(
        &self,
        dir: &Path,
        input: Bytes,
        format: MediaFormat,
        timeout: Duration,
    ) -> Result<Bytes, ToolFailure> {
        let input_path = dir.join(format!("input.{}", format.extension()));
        let output_path = dir.join(format!("output.{}", format.output_profile().extension));

        fs::write(&input_path, &input)
            .await
            .map_err(|e| ToolFailure::Scratch(e.to_string()))?;

        let child = self
            .command(&input_path, &output_path, format)
            .spawn()
            .map_err(|e| ToolFailure::Spawn(format!("{}: {}", self.program, e)))?;

        debug!(program = %self.program, ?format, "Tool started");

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ToolFailure::Spawn(e.to_string()))?,
            Err(_) => {
                warn!(program = %self.program, "Tool exceeded {:?}, killed", timeout);
                return Err(ToolFailure::Timeout(timeout));
            }
        };

        if !output.status.success() {
            let stderr = stderr_tail(&output.stderr);
            if REJECTED_INPUT_MARKERS.iter().any(|m| stderr.contains(m)) {
                return Err(ToolFailure::Rejected(stderr));
            }
            return Err(ToolFailure::NonZeroExit {
                code: output.status.code(),
                stderr,
            });
        }

        match fs::read(&output_path).await {
            Ok(data) if !data.is_empty() => Ok(Bytes::from(data)),
            Ok(_) => Err(ToolFailure::Rejected("tool produced an empty output".to_string())),
            Err(_) => Err(ToolFailure::Rejected("tool produced no output".to_string())),
        }
    }

    fn command(&self, input: &Path, output: &Path, format: MediaFormat) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .args(["-hide_banner", "-nostdin", "-y", "-i"])
            .arg(input)
            .args(format.output_profile().args)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: Bytes,
        format: MediaFormat,
        timeout: Duration,
    ) -> Result<Bytes, ToolFailure> {
        let scratch = ScratchDir::create(&self.scratch_root).await?;
        let result = self.run_in(scratch.path(), input, format, timeout).await;
        scratch.remove().await;
        result
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

/// Per-invocation working directory.
///
/// Normal exits remove it with `remove`. If the owning future is dropped
/// mid-run the directory is removed on the blocking pool instead.
struct ScratchDir {
    path: PathBuf,
    removed: bool,
}

impl ScratchDir {
    async fn create(root: &Path) -> Result<Self, ToolFailure> {
        let path = root.join(Uuid::new_v4().to_string());
        fs::create_dir_all(&path)
            .await
            .map_err(|e| ToolFailure::Scratch(e.to_string()))?;
        Ok(Self { path, removed: false })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn remove(mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path).await {
            warn!("Failed to remove scratch dir {}: {}", self.path.display(), e);
        }
        self.removed = true;
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_scratch(&path));
            }
            Err(_) => remove_scratch(&path),
        }
    }
}

fn remove_scratch(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        warn!("Failed to remove scratch dir {}: {}", path.display(), e);
    }
}
