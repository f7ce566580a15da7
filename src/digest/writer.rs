// src/digest/writer.rs
//! LLM-backed digest writer behind a process-wide default-model setting.
//!
//! The backend's default model is shared by every process on the host, so a
//! call runs as a lease: lock, remember the previous model, switch if needed,
//! generate, restore, unlock.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::lock::{self, LockError, LockSettings};

/// Operations the writer needs from a model backend.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn current_model(&self) -> Result<String>;
    async fn list_models(&self) -> Result<Vec<String>>;
    async fn set_model(&self, model: &str) -> Result<()>;
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("writer disabled by policy")]
    Disabled,
    #[error("writer backend not found")]
    BackendMissing,
    #[error("model `{0}` is not available")]
    ModelUnavailable(String),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("writer timed out after {0:?}")]
    Timeout(Duration),
    #[error("writer failed: {0:#}")]
    Failed(anyhow::Error),
    #[error("writer output unparsable: {0}")]
    Unparsable(String),
}

impl WriterError {
    /// Machine-readable fallback reason.
    pub fn reason(&self) -> &'static str {
        match self {
            WriterError::Disabled => "disabled",
            WriterError::BackendMissing => "backend_missing",
            WriterError::ModelUnavailable(_) => "model_unavailable",
            WriterError::Lock(LockError::Timeout { .. }) => "lock_timeout",
            WriterError::Lock(_) => "lock_error",
            WriterError::Timeout(_) => "timeout",
            WriterError::Failed(_) => "failed",
            WriterError::Unparsable(_) => "unparsable",
        }
    }
}

/// Run `prompt` on `target` (or the current default) under the model lease.
/// The previous default is restored on every path once a switch was tried.
///
/// The lease runs on its own task: dropping the returned future (a client
/// hanging up mid-request) leaves the task to finish, restore and unlock.
pub async fn generate_with_lease(
    backend: Arc<dyn ModelBackend>,
    target: Option<String>,
    lock_settings: LockSettings,
    call_timeout: Duration,
    prompt: String,
) -> Result<String, WriterError> {
    let task = tokio::spawn(async move {
        lease(
            backend.as_ref(),
            target.as_deref(),
            &lock_settings,
            call_timeout,
            &prompt,
        )
        .await
    });
    task.await
        .map_err(|e| WriterError::Failed(anyhow!("writer task: {e}")))?
}

async fn lease(
    backend: &dyn ModelBackend,
    target: Option<&str>,
    lock_settings: &LockSettings,
    call_timeout: Duration,
    prompt: &str,
) -> Result<String, WriterError> {
    let guard = lock::acquire(lock_settings).await?;

    let previous = backend
        .current_model()
        .await
        .map_err(WriterError::Failed)?;
    let mut switched = false;
    if let Some(t) = target.filter(|t| *t != previous) {
        let models = backend.list_models().await.map_err(WriterError::Failed)?;
        if !models.iter().any(|m| m == t) {
            return Err(WriterError::ModelUnavailable(t.to_string()));
        }
        if let Err(e) = backend.set_model(t).await {
            // The switch may have half-applied.
            restore(backend, &previous).await;
            return Err(WriterError::Failed(e));
        }
        switched = true;
        tracing::debug!(target: "digest", from = %previous, to = %t, "default model switched");
    }

    let result = match tokio::time::timeout(call_timeout, backend.generate(prompt)).await {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(WriterError::Failed(e)),
        Err(_) => Err(WriterError::Timeout(call_timeout)),
    };

    if switched {
        restore(backend, &previous).await;
    }
    drop(guard);
    result
}

async fn restore(backend: &dyn ModelBackend, previous: &str) {
    if let Err(e) = backend.set_model(previous).await {
        tracing::warn!(target: "digest", model = %previous, error = %format!("{e:#}"), "failed to restore default model");
    }
}

/// `llm`-style CLI: `models default [<m>]`, `models list`, prompt on stdin.
#[derive(Debug, Clone)]
pub struct CliModelBackend {
    program: PathBuf,
    admin_timeout: Duration,
}

impl CliModelBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            admin_timeout: Duration::from_secs(15),
        }
    }

    /// Resolve `command` through `PATH`; `None` when it is not installed.
    pub fn locate(command: &str) -> Option<Self> {
        which::which(command).ok().map(Self::new)
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning {}", self.program.display()))?;
        if let Some(input) = stdin {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin not captured"))?;
            pipe.write_all(input.as_bytes()).await.context("writing prompt")?;
            drop(pipe);
        }
        let out = child.wait_with_output().await.context("waiting for writer")?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(anyhow!(
                "{} {:?} exited with {}: {}",
                self.program.display(),
                args,
                out.status,
                stderr.trim()
            ));
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    async fn run_admin(&self, args: &[&str]) -> Result<String> {
        tokio::time::timeout(self.admin_timeout, self.run(args, None))
            .await
            .map_err(|_| anyhow!("{:?} timed out", args))?
    }
}

#[async_trait]
impl ModelBackend for CliModelBackend {
    fn name(&self) -> &'static str {
        "cli"
    }

    async fn current_model(&self) -> Result<String> {
        Ok(self.run_admin(&["models", "default"]).await?.trim().to_string())
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let out = self.run_admin(&["models", "list"]).await?;
        Ok(parse_model_list(&out))
    }

    async fn set_model(&self, model: &str) -> Result<()> {
        self.run_admin(&["models", "default", model]).await.map(|_| ())
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.run(&[], Some(prompt)).await
    }
}

/// Lines look like `Provider: model-id (aliases: a, b)`; the id and aliases count.
pub fn parse_model_list(out: &str) -> Vec<String> {
    let mut models = Vec::new();
    for line in out.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let rest = line.split_once(": ").map(|(_, r)| r).unwrap_or(line);
        let (id, aliases) = match rest.split_once(" (aliases: ") {
            Some((id, a)) => (id, Some(a.trim_end_matches(')'))),
            None => (rest, None),
        };
        models.push(id.trim().to_string());
        if let Some(a) = aliases {
            models.extend(a.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()));
        }
    }
    models
}


#[cfg(test)]
mod tests {
    use super::fake::FakeBackend;
    use super::*;

    fn settings(dir: &Path) -> LockSettings {
        LockSettings {
            path: dir.join("writer.lock"),
            timeout: Duration::from_millis(100),
            poll: Duration::from_millis(10),
        }
    }

    async fn run(b: &Arc<FakeBackend>, target: &str, dir: &Path, timeout: Duration) -> Result<String, WriterError> {
        generate_with_lease(
            b.clone(),
            Some(target.to_string()),
            settings(dir),
            timeout,
            "p".to_string(),
        )
        .await
    }

    #[tokio::test]
    async fn switches_and_restores_model() {
        let dir = tempfile::tempdir().unwrap();
        let b = Arc::new(FakeBackend::new("base", &["base", "writer"], Ok("{}")));
        let out = run(&b, "writer", dir.path(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(out, "{}");
        assert_eq!(*b.history.lock().unwrap(), vec!["writer", "base"]);
        assert_eq!(*b.current.lock().unwrap(), "base");
    }

    #[tokio::test]
    async fn restores_even_when_generation_fails() {
        let dir = tempfile::tempdir().unwrap();
        let b = Arc::new(FakeBackend::new("base", &["writer"], Err("boom")));
        let err = run(&b, "writer", dir.path(), Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.reason(), "failed");
        assert_eq!(*b.current.lock().unwrap(), "base");
        assert!(!dir.path().join("writer.lock").exists());
    }

    #[tokio::test]
    async fn failed_switch_still_restores() {
        let dir = tempfile::tempdir().unwrap();
        let mut fake = FakeBackend::new("base", &["writer"], Ok("{}"));
        fake.fail_switch_to = Some("writer".into());
        let b = Arc::new(fake);
        let err = run(&b, "writer", dir.path(), Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.reason(), "failed");
        assert_eq!(*b.history.lock().unwrap(), vec!["writer", "base"]);
        assert_eq!(*b.current.lock().unwrap(), "base");
    }

    #[tokio::test]
    async fn dropped_caller_still_restores_and_unlocks() {
        let dir = tempfile::tempdir().unwrap();
        let mut fake = FakeBackend::new("base", &["base", "writer"], Ok("{}"));
        fake.delay = Duration::from_millis(300);
        let b = Arc::new(fake);

        let cut = tokio::time::timeout(
            Duration::from_millis(50),
            run(&b, "writer", dir.path(), Duration::from_secs(5)),
        )
        .await;
        assert!(cut.is_err());
        assert_eq!(*b.current.lock().unwrap(), "writer");

        let lock = dir.path().join("writer.lock");
        for _ in 0..100 {
            if *b.current.lock().unwrap() == "base" && !lock.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(*b.current.lock().unwrap(), "base");
        assert!(!lock.exists());
    }

    #[tokio::test]
    async fn same_model_is_not_switched_and_timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut fake = FakeBackend::new("writer", &["writer"], Ok("late"));
        fake.delay = Duration::from_millis(200);
        let b = Arc::new(fake);
        let err = run(&b, "writer", dir.path(), Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err.reason(), "timeout");
        assert!(b.history.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_target_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let b = Arc::new(FakeBackend::new("base", &["base"], Ok("x")));
        let err = run(&b, "missing", dir.path(), Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.reason(), "model_unavailable");
        assert!(b.history.lock().unwrap().is_empty());
    }

    #[test]
    fn model_list_parsing() {
        let out = "OpenAI Chat: gpt-4o (aliases: 4o)\nAnthropic Messages: claude-3-haiku\n\n";
        assert_eq!(parse_model_list(out), vec!["gpt-4o", "4o", "claude-3-haiku"]);
    }
}
