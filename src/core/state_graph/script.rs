#![allow(clippy::result_large_err)] // Script runners return AppError to surface exit and timeout diagnostics.

//! Script execution for a single state: log rotation, output capture with
//! tee sinks, and timeout supervision.

use crate::core::error::AppError;
use crate::core::state_graph::state::script_timeout_duration;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

const ROTATION_SUFFIX_FORMAT: &str = "%Y%m%dT%H%M%S%3f";

#[derive(Clone, Debug)]
pub struct ScriptRequest {
    pub state_name: String,
    pub script: String,
    /// Directory of the collection's backing file.
    pub working_dir: PathBuf,
    pub log_path: PathBuf,
    /// Logs of calling states that receive a copy of every line.
    pub tee_paths: Vec<PathBuf>,
    pub timeout: Option<Duration>,
    pub shell: String,
}

impl ScriptRequest {
    /// Convert a timeout in minutes into a duration; zero means none.
    /// Values no `Duration` can hold also run without a limit.
    pub fn timeout_from_minutes(minutes: f64) -> Option<Duration> {
        match script_timeout_duration(minutes) {
            Ok(limit) => limit,
            Err(err) => {
                tracing::warn!(minutes, error = %err, "ignoring unusable script timeout");
                None
            }
        }
    }
}

#[async_trait]
pub trait ScriptRunner: Send + Sync + 'static {
    async fn run(&self, request: &ScriptRequest) -> Result<(), AppError>;
}

/// Runs `<shell> -c <script>` as a child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellScriptRunner;

#[async_trait]
impl ScriptRunner for ShellScriptRunner {
    async fn run(&self, request: &ScriptRequest) -> Result<(), AppError> {
        rotate_log(&request.log_path);
        let sinks = Arc::new(Mutex::new(
            LogSinks::open(&request.log_path, &request.tee_paths).await?,
        ));

        tracing::debug!(
            state = %request.state_name,
            cwd = %request.working_dir.display(),
            timeout_secs = request.timeout.map(|limit| limit.as_secs_f64()),
            "spawning script"
        );

        let supervised = tokio::spawn(supervise(request.clone(), sinks.clone()));
        let outcome = match supervised.await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(AppError::new(
                ErrorCategory::ExecutionError,
                format!(
                    "supervising state '{}' failed: {}",
                    request.state_name, join_err
                ),
            )
            .with_code("SG-EXEC-004")),
        };
        sinks.lock().await.flush().await;

        outcome.map_err(|err| attach_last_line(err, &request.log_path))
    }
}

/// Writes a single placeholder line instead of running anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockScriptRunner;

#[async_trait]
impl ScriptRunner for MockScriptRunner {
    async fn run(&self, request: &ScriptRequest) -> Result<(), AppError> {
        rotate_log(&request.log_path);
        let mut sinks = LogSinks::open(&request.log_path, &request.tee_paths).await?;
        sinks
            .write_line(&format!(
                "mock execution of state '{}': {}",
                request.state_name, request.script
            ))
            .await;
        sinks.flush().await;
        tracing::info!(state = %request.state_name, "mock execution");
        Ok(())
    }
}

async fn supervise(request: ScriptRequest, sinks: Arc<Mutex<LogSinks>>) -> Result<(), AppError> {
    let mut command = Command::new(&request.shell);
    command
        .arg("-c")
        .arg(&request.script)
        .current_dir(&request.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|err| {
        AppError::new(
            ErrorCategory::ExecutionError,
            format!(
                "failed to start script for state '{}': {}",
                request.state_name, err
            ),
        )
        .with_code("SG-EXEC-001")
    })?;

    let group = child.id();
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(pump(stdout, sinks.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(pump(stderr, sinks.clone())));
    }

    // Output is complete only once every holder of the pipes is gone, so the
    // limit covers the readers as well as the shell itself.
    let completion = async {
        let status = child.wait().await;
        let joined = futures::future::join_all(readers.iter_mut()).await;
        (status, joined)
    };
    let finished = match request.timeout {
        Some(limit) => tokio::time::timeout(limit, completion).await.ok(),
        None => Some(completion.await),
    };

    let Some((status, joined)) = finished else {
        terminate(&mut child, group, &request.state_name).await;
        for reader in &readers {
            reader.abort();
        }
        let minutes = request
            .timeout
            .map(|limit| limit.as_secs_f64() / 60.0)
            .unwrap_or_default();
        let reason = format!(
            "state '{}' timed out after {} minute(s)",
            request.state_name, minutes
        );
        sinks.lock().await.write_line(&reason).await;
        return Err(
            AppError::new(ErrorCategory::ExecutionError, reason).with_code("SG-EXEC-002")
        );
    };

    let status = status.map_err(|err| {
        AppError::new(
            ErrorCategory::ExecutionError,
            format!(
                "failed to wait for script of state '{}': {}",
                request.state_name, err
            ),
        )
        .with_code("SG-EXEC-001")
    })?;

    for result in joined {
        if let Err(join_err) = result {
            return Err(AppError::new(
                ErrorCategory::ExecutionError,
                format!(
                    "output capture for state '{}' failed: {}",
                    request.state_name, join_err
                ),
            )
            .with_code("SG-EXEC-004"));
        }
    }

    if status.success() {
        return Ok(());
    }
    let code = status
        .code()
        .map(|code| code.to_string())
        .unwrap_or_else(|| "signal".to_string());
    let mut err = AppError::new(
        ErrorCategory::ExecutionError,
        format!(
            "script for state '{}' exited with code {}",
            request.state_name, code
        ),
    )
    .with_code("SG-EXEC-003");
    err.add_context("exit_code", &code);
    Err(err)
}

/// Kill the script's whole process group, then the shell itself if it is
/// still around.
async fn terminate(child: &mut Child, group: Option<u32>, state_name: &str) {
    #[cfg(unix)]
    if let Some(leader) = group.and_then(|pid| i32::try_from(pid).ok()) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Err(err) = killpg(Pid::from_raw(leader), Signal::SIGKILL) {
            tracing::debug!(state = %state_name, error = %err, "process group already gone");
        }
    }
    #[cfg(not(unix))]
    let _ = group;

    match child.try_wait() {
        Ok(Some(_)) => {}
        _ => {
            if let Err(err) = child.kill().await {
                tracing::warn!(state = %state_name, error = %err, "failed to kill timed out script");
            }
        }
    }
}

async fn pump<R>(reader: R, sinks: Arc<Mutex<LogSinks>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => sinks.lock().await.write_line(&line).await,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "stopped reading script output");
                break;
            }
        }
    }
}

/// The state's own log plus any caller logs.
struct LogSinks {
    files: Vec<(PathBuf, File)>,
}

impl LogSinks {
    async fn open(log_path: &Path, tee_paths: &[PathBuf]) -> Result<Self, AppError> {
        let primary = open_append(log_path).await.map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to open log {}: {}", log_path.display(), err),
            )
            .with_code("SG-LOG-001")
        })?;
        let mut files = vec![(log_path.to_path_buf(), primary)];
        for tee in tee_paths {
            match open_append(tee).await {
                Ok(file) => files.push((tee.clone(), file)),
                Err(err) => {
                    tracing::warn!(path = %tee.display(), error = %err, "skipping caller log")
                }
            }
        }
        Ok(Self { files })
    }

    async fn write_line(&mut self, line: &str) {
        for (path, file) in &mut self.files {
            let written = file.write_all(line.as_bytes()).await;
            let written = match written {
                Ok(()) => file.write_all(b"\n").await,
                Err(err) => Err(err),
            };
            if let Err(err) = written {
                tracing::warn!(path = %path.display(), error = %err, "failed to write log line");
            }
        }
    }

    async fn flush(&mut self) {
        for (path, file) in &mut self.files {
            if let Err(err) = file.flush().await {
                tracing::warn!(path = %path.display(), error = %err, "failed to flush log");
            }
        }
    }
}

async fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    OpenOptions::new().create(true).append(true).open(path).await
}

/// Name a previous log takes when it is rotated away.
pub fn rotated_log_path(log_path: &Path) -> PathBuf {
    let stem = log_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let extension = log_path
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_else(|| "log".to_string());
    let suffix = Utc::now().format(ROTATION_SUFFIX_FORMAT);
    log_path.with_file_name(format!("{}-{}.{}", stem, suffix, extension))
}

/// Move an existing log aside. Failures are logged and ignored.
pub fn rotate_log(log_path: &Path) {
    if !log_path.exists() {
        return;
    }
    let target = rotated_log_path(log_path);
    if let Err(err) = std::fs::rename(log_path, &target) {
        tracing::warn!(
            from = %log_path.display(),
            to = %target.display(),
            error = %err,
            "log rotation failed"
        );
    }
}

pub fn last_non_empty_line(log_path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(log_path).ok()?;
    content
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

fn attach_last_line(mut err: AppError, log_path: &Path) -> AppError {
    if let Some(line) = last_non_empty_line(log_path) {
        if !err.message.ends_with(&line) {
            err.message = format!("{}: {}", err.message, line);
        }
        err.add_context("last_log_line", &line);
    }
    err
}
