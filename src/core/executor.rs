//! Execution manager: runs shell commands with secrets injected.
//!
//! Each command runs through `sh -c` in its own process group so that
//! cancellation and timeouts reach every descendant. Captured output is
//! redacted before it is written to the output directory or returned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use command_group::{AsyncCommandGroup, AsyncGroupChild};
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::SecretProvider;

use super::secrets::{resolve_placeholders, Redactor, SecretError};

/// Time between SIGTERM and SIGKILL
pub const TERMINATION_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to load secrets: {0:#}")]
    Secrets(#[source] anyhow::Error),

    #[error("environment variable {var}: {source}")]
    Placeholder {
        var: String,
        #[source]
        source: SecretError,
    },

    #[error("failed to spawn '{label}': {source}")]
    Spawn {
        label: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for '{label}': {source}")]
    Wait {
        label: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write log {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One command to run
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Names the log file; need not be unique per run but should be
    pub label: String,
    pub command: String,
    pub working_dir: PathBuf,
    /// Values may contain secret placeholders
    pub env: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(
        label: impl Into<String>,
        command: impl Into<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            label: label.into(),
            command: command.into(),
            working_dir: working_dir.into(),
            env: HashMap::new(),
            timeout: None,
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// How a command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exit code; -1 when terminated by a signal
    Exited(i32),
    Cancelled,
    TimedOut,
}

/// Redacted result of a command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub label: String,
    pub exit: ExitKind,
    pub stdout: String,
    pub stderr: String,
    pub log_path: Option<PathBuf>,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit == ExitKind::Exited(0)
    }
}

struct LoadedSecrets {
    values: HashMap<String, String>,
    redactor: Redactor,
}

pub struct ExecutionManager {
    provider: Arc<dyn SecretProvider>,
    secrets: OnceCell<LoadedSecrets>,
    output_dir: PathBuf,
    parallelism: usize,
    termination_grace: Duration,
}

impl ExecutionManager {
    pub fn new(
        provider: Arc<dyn SecretProvider>,
        output_dir: impl Into<PathBuf>,
        parallelism: usize,
    ) -> Self {
        Self {
            provider,
            secrets: OnceCell::new(),
            output_dir: output_dir.into(),
            parallelism: parallelism.max(1),
            termination_grace: TERMINATION_GRACE,
        }
    }

    pub fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    async fn loaded(&self) -> Result<&LoadedSecrets, ExecError> {
        self.secrets
            .get_or_try_init(|| async {
                let values = self.provider.secrets().await.map_err(ExecError::Secrets)?;
                debug!(count = values.len(), "Secrets loaded");
                let redactor = Redactor::new(values.values());
                Ok::<_, ExecError>(LoadedSecrets { values, redactor })
            })
            .await
    }

    /// Resolve secret placeholders in `env`, loading secrets on first use
    pub async fn resolve_env(
        &self,
        env: &HashMap<String, String>,
    ) -> Result<HashMap<String, String>, ExecError> {
        let secrets = self.loaded().await?;
        resolve_env(env, &secrets.values)
    }

    /// Redact every known secret from `text`
    pub async fn redact(&self, text: &str) -> Result<String, ExecError> {
        Ok(self.loaded().await?.redactor.redact(text))
    }

    pub async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ExecError> {
        let secrets = self.loaded().await?;
        let started = Instant::now();
        let env = resolve_env(&spec.env, &secrets.values)?;

        if cancel.is_cancelled() {
            return Ok(CommandOutput {
                label: spec.label.clone(),
                exit: ExitKind::Cancelled,
                stdout: String::new(),
                stderr: String::new(),
                log_path: None,
                duration: started.elapsed(),
            });
        }

        debug!(
            label = %spec.label,
            command = %secrets.redactor.redact(&spec.command),
            "Running command"
        );

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&spec.command)
            .current_dir(&spec.working_dir)
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child: AsyncGroupChild = cmd.group_spawn().map_err(|source| ExecError::Spawn {
            label: spec.label.clone(),
            source,
        })?;

        let stdout = tokio::spawn(read_all(child.inner().stdout.take()));
        let stderr = tokio::spawn(read_all(child.inner().stderr.take()));

        let deadline = async {
            match spec.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        let exit = tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|source| ExecError::Wait {
                    label: spec.label.clone(),
                    source,
                })?;
                ExitKind::Exited(status.code().unwrap_or(-1))
            }
            _ = deadline => {
                warn!(label = %spec.label, "Command timed out");
                terminate_process_group(&mut child, self.termination_grace).await;
                ExitKind::TimedOut
            }
            _ = cancel.cancelled() => {
                info!(label = %spec.label, "Command cancelled");
                terminate_process_group(&mut child, self.termination_grace).await;
                ExitKind::Cancelled
            }
        };

        let stdout = secrets.redactor.redact(&stdout.await.unwrap_or_default());
        let stderr = secrets.redactor.redact(&stderr.await.unwrap_or_default());

        let log_path = self
            .write_log(&spec.label, &secrets.redactor.redact(&spec.command), exit, &stdout, &stderr)
            .await?;

        Ok(CommandOutput {
            label: spec.label.clone(),
            exit,
            stdout,
            stderr,
            log_path: Some(log_path),
            duration: started.elapsed(),
        })
    }

    /// Run independent commands with bounded concurrency; results keep input order
    pub async fn run_all(
        &self,
        specs: Vec<CommandSpec>,
        cancel: &CancellationToken,
    ) -> Vec<Result<CommandOutput, ExecError>> {
        stream::iter(specs)
            .map(|spec| async move { self.run(&spec, cancel).await })
            .buffered(self.parallelism)
            .collect()
            .await
    }

    async fn write_log(
        &self,
        label: &str,
        command: &str,
        exit: ExitKind,
        stdout: &str,
        stderr: &str,
    ) -> Result<PathBuf, ExecError> {
        let path = self.output_dir.join(log_file_name(label));
        let content = format!(
            "$ {}\n# exit: {:?}\n--- stdout ---\n{}\n--- stderr ---\n{}\n",
            command, exit, stdout, stderr
        );

        let write = async {
            tokio::fs::create_dir_all(&self.output_dir).await?;
            tokio::fs::write(&path, content).await
        };
        write.await.map_err(|source| ExecError::Log {
            path: path.clone(),
            source,
        })?;

        Ok(path)
    }
}

fn resolve_env(
    env: &HashMap<String, String>,
    secrets: &HashMap<String, String>,
) -> Result<HashMap<String, String>, ExecError> {
    env.iter()
        .map(|(var, value)| {
            resolve_placeholders(value, secrets)
                .map(|resolved| (var.clone(), resolved))
                .map_err(|source| ExecError::Placeholder {
                    var: var.clone(),
                    source,
                })
        })
        .collect()
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf).await {
        warn!(error = %e, "Error reading command output");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// `<sanitized label>-<label digest>.log`; distinct labels never share a file
fn log_file_name(label: &str) -> String {
    let digest = hex::encode(Sha256::digest(label.as_bytes()));
    format!("{}-{}.log", sanitize_label(label), &digest[..12])
}

/// File-name-safe form of a label
fn sanitize_label(label: &str) -> String {
    let sanitized: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() || sanitized.starts_with('.') {
        format!("_{}", sanitized)
    } else {
        sanitized
    }
}

/// SIGTERM the group, wait up to `grace`, then SIGKILL and reap
#[cfg(unix)]
async fn terminate_process_group(child: &mut AsyncGroupChild, grace: Duration) {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.inner().id() else {
        return;
    };
    let pgid = Pid::from_raw(-(pid as i32));

    if let Err(e) = signal::kill(pgid, Signal::SIGTERM) {
        if e != Errno::ESRCH {
            warn!(pid, error = ?e, "SIGTERM to process group failed");
        }
    }

    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        if child.inner().try_wait().ok().flatten().is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    if let Err(e) = signal::kill(pgid, Signal::SIGKILL) {
        if e != Errno::ESRCH {
            warn!(pid, error = ?e, "SIGKILL to process group failed");
        }
    }

    let _ = child.wait().await;
}

#[cfg(not(unix))]
async fn terminate_process_group(child: &mut AsyncGroupChild, _grace: Duration) {
    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::adapters::StaticSecrets;
    use tempfile::TempDir;

    fn manager(temp: &TempDir) -> ExecutionManager {
        let secrets = HashMap::from([("API_TOKEN".to_string(), "s3cr3t-value".to_string())]);
        ExecutionManager::new(Arc::new(StaticSecrets::new(secrets)), temp.path().join("out"), 2)
            .with_termination_grace(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_exit_code_and_output() {
        let temp = TempDir::new().unwrap();
        let spec = CommandSpec::new("fail", "echo out; echo err >&2; exit 3", temp.path());

        let output = manager(&temp).run(&spec, &CancellationToken::new()).await.unwrap();

        assert_eq!(output.exit, ExitKind::Exited(3));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_secret_is_injected_and_redacted() {
        let temp = TempDir::new().unwrap();
        let env = HashMap::from([(
            "TOKEN".to_string(),
            "${{ secrets.API_TOKEN }}".to_string(),
        )]);
        let spec = CommandSpec::new("suite::case", "echo token=$TOKEN", temp.path()).with_env(env);

        let output = manager(&temp).run(&spec, &CancellationToken::new()).await.unwrap();

        assert!(output.success());
        assert_eq!(output.stdout.trim(), "token=****");

        let log_path = output.log_path.unwrap();
        let file_name = log_path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with("suite__case-") && file_name.ends_with(".log"));
        let log = std::fs::read_to_string(log_path).unwrap();
        assert!(!log.contains("s3cr3t-value"));
    }

    #[tokio::test]
    async fn test_unknown_secret_is_an_error() {
        let temp = TempDir::new().unwrap();
        let env = HashMap::from([("X".to_string(), "${{ secrets.MISSING }}".to_string())]);
        let spec = CommandSpec::new("x", "true", temp.path()).with_env(env);

        let err = manager(&temp).run(&spec, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ExecError::Placeholder { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_terminates_group() {
        let temp = TempDir::new().unwrap();
        let spec = CommandSpec::new("slow", "sleep 30 & sleep 30; wait", temp.path());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let output = manager(&temp).run(&spec, &cancel).await.unwrap();

        assert_eq!(output.exit, ExitKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timeout() {
        let temp = TempDir::new().unwrap();
        let spec = CommandSpec::new("hang", "sleep 30", temp.path())
            .with_timeout(Duration::from_millis(100));

        let output = manager(&temp).run(&spec, &CancellationToken::new()).await.unwrap();
        assert_eq!(output.exit, ExitKind::TimedOut);
    }

    #[tokio::test]
    async fn test_run_all_preserves_order() {
        let temp = TempDir::new().unwrap();
        let specs = vec![
            CommandSpec::new("a", "sleep 0.2; echo a", temp.path()),
            CommandSpec::new("b", "echo b", temp.path()),
            CommandSpec::new("c", "echo c", temp.path()),
        ];

        let outputs = manager(&temp).run_all(specs, &CancellationToken::new()).await;
        let stdout: Vec<_> = outputs
            .into_iter()
            .map(|o| o.unwrap().stdout.trim().to_string())
            .collect();

        assert_eq!(stdout, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_already_cancelled_does_not_spawn() {
        let temp = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let spec = CommandSpec::new("never", "touch ran", temp.path());
        let output = manager(&temp).run(&spec, &cancel).await.unwrap();

        assert_eq!(output.exit, ExitKind::Cancelled);
        assert!(!temp.path().join("ran").exists());
    }

    #[tokio::test]
    async fn test_similar_labels_keep_separate_logs() {
        let temp = TempDir::new().unwrap();
        let specs = vec![
            CommandSpec::new("suite/case", "echo first", temp.path()),
            CommandSpec::new("suite case", "echo second", temp.path()),
        ];

        let outputs = manager(&temp).run_all(specs, &CancellationToken::new()).await;
        let paths: Vec<_> = outputs
            .into_iter()
            .map(|o| o.unwrap().log_path.unwrap())
            .collect();

        assert_ne!(paths[0], paths[1]);
        assert!(std::fs::read_to_string(&paths[0]).unwrap().contains("first"));
        assert!(std::fs::read_to_string(&paths[1]).unwrap().contains("second"));
    }

    #[tokio::test]
    async fn test_run_all_bounds_concurrency() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("active")).unwrap();
        let specs = (0..6)
            .map(|i| {
                let command = format!(
                    "touch active/{i}; ls active | wc -l >> peaks; sleep 0.3; rm active/{i}"
                );
                CommandSpec::new(format!("c{}", i), command, temp.path())
            })
            .collect();

        let outputs = manager(&temp).run_all(specs, &CancellationToken::new()).await;
        assert!(outputs.iter().all(|o| o.as_ref().unwrap().success()));

        let peaks: Vec<usize> = std::fs::read_to_string(temp.path().join("peaks"))
            .unwrap()
            .lines()
            .map(|l| l.trim().parse().unwrap())
            .collect();
        assert_eq!(peaks.len(), 6);
        assert_eq!(peaks.iter().max(), Some(&2));
    }

    #[test]
    fn test_log_file_name_is_unique_per_label() {
        assert_ne!(log_file_name("suite/case"), log_file_name("suite case"));
        assert_eq!(log_file_name("t1"), log_file_name("t1"));
    }

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("a/b c"), "a_b_c");
        assert_eq!(sanitize_label(".hidden"), "_.hidden");
        assert_eq!(sanitize_label(""), "_");
    }
}
