//! Locating and running `ffmpeg` / `ffprobe`.

use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::runtime::{Builder, Handle};
use tracing::{debug, info, warn};

use crate::error::{ExtractionError, StartupError};

const FFMPEG: &str = "ffmpeg";
const FFPROBE: &str = "ffprobe";

/// Resolved paths to the external media tools
#[derive(Debug, Clone)]
pub struct MediaTools {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    timeout: Option<Duration>,
}

impl MediaTools {
    /// Use the given executables as-is
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf, timeout: Option<Duration>) -> Self {
        Self {
            ffmpeg,
            ffprobe,
            timeout,
        }
    }

    /// Find both tools, preferring configured paths over `PATH`.
    ///
    /// A missing tool is fatal: nothing can be extracted without it.
    pub fn locate(
        ffmpeg: Option<&Path>,
        ffprobe: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<Self, StartupError> {
        let ffmpeg = resolve_tool(ffmpeg, FFMPEG)?;
        let ffprobe = resolve_tool(ffprobe, FFPROBE)?;

        info!("Using ffmpeg at {:?}, ffprobe at {:?}", ffmpeg, ffprobe);
        Ok(Self::new(ffmpeg, ffprobe, timeout))
    }

    pub fn ffmpeg(&self) -> &Path {
        &self.ffmpeg
    }

    pub fn ffprobe(&self) -> &Path {
        &self.ffprobe
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run ffmpeg and require a zero exit status
    pub fn run_ffmpeg<I, S>(&self, args: I) -> Result<Output, ExtractionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.ffmpeg);
        command.args(args);
        block_on(FFMPEG, run_tool(command, FFMPEG, self.timeout))
    }

    /// Run ffprobe and require a zero exit status
    pub fn run_ffprobe<I, S>(&self, args: I) -> Result<Output, ExtractionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.ffprobe);
        command.args(args);
        block_on(FFPROBE, run_tool(command, FFPROBE, self.timeout))
    }
}

fn resolve_tool(configured: Option<&Path>, name: &str) -> Result<PathBuf, StartupError> {
    match configured {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) if path.components().count() == 1 => {
            find_in_path(&path.to_string_lossy()).ok_or_else(|| StartupError::ToolNotFound(name.to_string()))
        }
        Some(path) => {
            warn!("Configured {} path does not exist: {:?}", name, path);
            Err(StartupError::ToolNotFound(name.to_string()))
        }
        None => find_in_path(name).ok_or_else(|| StartupError::ToolNotFound(name.to_string())),
    }
}

/// Search `PATH` for an executable
pub fn find_in_path(tool: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    find_in_dirs(tool, std::env::split_paths(&path_var))
}

fn find_in_dirs<I: IntoIterator<Item = PathBuf>>(tool: &str, dirs: I) -> Option<PathBuf> {
    for dir in dirs {
        let full = dir.join(tool);
        if full.is_file() {
            return Some(full);
        }
        #[cfg(windows)]
        {
            let exe = dir.join(format!("{tool}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
    }
    None
}

/// Drive a tool future from synchronous code.
///
/// Runs on the ambient runtime when called from a blocking task, otherwise
/// on a single-threaded runtime built for this call. Must not be called
/// from inside an async task.
fn block_on<F>(tool: &str, future: F) -> Result<Output, ExtractionError>
where
    F: Future<Output = Result<Output, ExtractionError>>,
{
    match Handle::try_current() {
        Ok(handle) => handle.block_on(future),
        Err(_) => Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| ExtractionError::Spawn {
                tool: tool.to_string(),
                source,
            })?
            .block_on(future),
    }
}

/// Run a command to completion, killing it if `timeout` elapses first.
///
/// Non-zero exits become [`ExtractionError::ToolFailed`] carrying the tool's
/// stderr verbatim.
pub(crate) async fn run_tool(
    mut command: Command,
    tool: &str,
    timeout: Option<Duration>,
) -> Result<Output, ExtractionError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Running {}: {:?}", tool, command);

    let child = command.spawn().map_err(|source| ExtractionError::Spawn {
        tool: tool.to_string(),
        source,
    })?;

    let wait = child.wait_with_output();
    let result = match timeout {
        None => wait.await,
        Some(timeout) => match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                // The child went down with the dropped wait future
                warn!("{} exceeded {:?}, killed it", tool, timeout);
                return Err(ExtractionError::TimedOut {
                    tool: tool.to_string(),
                    timeout,
                });
            }
        },
    };

    let output = result.map_err(|source| {
        debug!("Failed to collect {} output: {}", tool, source);
        ExtractionError::ToolOutput {
            tool: tool.to_string(),
            source,
        }
    })?;

    if !output.status.success() {
        return Err(ExtractionError::ToolFailed {
            tool: tool.to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_find_in_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ffmpeg"), b"").unwrap();

        let found = find_in_dirs("ffmpeg", vec![PathBuf::from("/nonexistent"), dir.path().to_path_buf()]);
        assert_eq!(found, Some(dir.path().join("ffmpeg")));
        assert!(find_in_dirs("ffprobe", vec![dir.path().to_path_buf()]).is_none());
    }

    #[test]
    fn test_missing_configured_tool_is_startup_error() {
        let result = MediaTools::locate(
            Some(Path::new("/nonexistent/bin/ffmpeg")),
            Some(Path::new("/nonexistent/bin/ffprobe")),
            None,
        );
        assert!(matches!(result, Err(StartupError::ToolNotFound(name)) if name == "ffmpeg"));
    }

    #[test]
    fn test_configured_files_are_used() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = dir.path().join("my-ffmpeg");
        let ffprobe = dir.path().join("my-ffprobe");
        std::fs::write(&ffmpeg, b"").unwrap();
        std::fs::write(&ffprobe, b"").unwrap();

        let tools = MediaTools::locate(Some(&ffmpeg), Some(&ffprobe), Some(Duration::from_secs(5))).unwrap();
        assert_eq!(tools.ffmpeg(), ffmpeg);
        assert_eq!(tools.ffprobe(), ffprobe);
        assert_eq!(tools.timeout(), Some(Duration::from_secs(5)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_keeps_stderr() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo 'first line' >&2; echo 'Invalid data found' >&2; exit 3"]);

        match run_tool(command, "ffmpeg", None).await {
            Err(ExtractionError::ToolFailed { tool, code, stderr }) => {
                assert_eq!(tool, "ffmpeg");
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "first line\nInvalid data found");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bounded_wait_kills_hung_tool() {
        let mut command = Command::new("sleep");
        command.arg("10");

        let started = Instant::now();
        let result = run_tool(command, "ffprobe", Some(Duration::from_millis(200))).await;
        assert!(matches!(result, Err(ExtractionError::TimedOut { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bounded_wait_collects_output() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo hello; echo warning >&2"]);

        let output = run_tool(command, "ffprobe", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
        assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "warning");
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let command = Command::new("/nonexistent/tool/binary");
        assert!(matches!(
            run_tool(command, "ffmpeg", None).await,
            Err(ExtractionError::Spawn { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_outside_any_runtime() {
        let tools = MediaTools::new(PathBuf::from("sh"), PathBuf::from("sh"), Some(Duration::from_secs(5)));
        let output = tools.run_ffprobe(["-c", "echo probed"]).unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "probed");
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_from_blocking_task() {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let tools = MediaTools::new(PathBuf::from("sh"), PathBuf::from("sh"), Some(Duration::from_millis(200)));

        let result = runtime.block_on(async move {
            tokio::task::spawn_blocking(move || tools.run_ffmpeg(["-c", "sleep 10"]))
                .await
                .unwrap()
        });
        assert!(matches!(result, Err(ExtractionError::TimedOut { .. })));
    }
}
