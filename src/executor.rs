//! Parallel process executor
//!
//! Device writes are delegated to OS processes, one per drive. [`ProcessExecutor::run_all`]
//! launches every task, then polls them at a fixed interval. A task is retired
//! the moment it is observed terminal, whether it succeeded, failed, or ran past
//! its deadline, so one broken drive can never keep the poll loop alive.

use crate::error::{PapertapeError, Result};
use std::fmt;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    NotStarted,
    Running,
    Succeeded,
    Failed(String),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed(_))
    }
}

/// One OS command line plus its completion state
#[derive(Debug, Clone)]
pub struct CommandTask {
    /// Caller tag, typically the drive the command writes to
    pub tag: usize,
    pub program: String,
    pub args: Vec<String>,
    state: TaskState,
}

impl CommandTask {
    pub fn new<P, I, S>(tag: usize, program: P, args: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tag,
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            state: TaskState::NotStarted,
        }
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Display for CommandTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.tag, self.command_line())
    }
}

/// Terminal tasks from one `run_all` call, in submission order
#[derive(Debug)]
pub struct ExecutionReport {
    pub tasks: Vec<CommandTask>,
}

impl ExecutionReport {
    pub fn all_succeeded(&self) -> bool {
        self.tasks.iter().all(|t| t.state == TaskState::Succeeded)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &CommandTask> {
        self.tasks.iter().filter(|t| t.state == TaskState::Succeeded)
    }

    pub fn failed(&self) -> impl Iterator<Item = &CommandTask> {
        self.tasks
            .iter()
            .filter(|t| matches!(t.state, TaskState::Failed(_)))
    }

    /// First failure as a `ProcessFailure`, if any
    pub fn first_failure(&self) -> Option<PapertapeError> {
        self.failed().next().map(|task| {
            let reason = match &task.state {
                TaskState::Failed(reason) => reason.clone(),
                _ => String::new(),
            };
            PapertapeError::process_failure(task.command_line(), reason)
        })
    }
}

struct RunningTask {
    index: usize,
    child: Child,
    started: Instant,
}

#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    poll_interval: Duration,
    task_timeout: Duration,
}

impl ProcessExecutor {
    pub fn new(poll_interval: Duration, task_timeout: Duration) -> Self {
        Self {
            poll_interval,
            task_timeout,
        }
    }

    /// Run every task concurrently and return once all are terminal
    pub async fn run_all(&self, mut tasks: Vec<CommandTask>) -> ExecutionReport {
        let mut running = Vec::with_capacity(tasks.len());

        for (index, task) in tasks.iter_mut().enumerate() {
            debug!("Launching {}", task);
            match Command::new(&task.program)
                .args(&task.args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .spawn()
            {
                Ok(child) => {
                    task.state = TaskState::Running;
                    running.push(RunningTask {
                        index,
                        child,
                        started: Instant::now(),
                    });
                }
                Err(e) => {
                    error!("Cannot launch {}: {}", task, e);
                    task.state = TaskState::Failed(format!("spawn failed: {}", e));
                }
            }
        }

        while !running.is_empty() {
            let mut still_running = Vec::with_capacity(running.len());

            for mut pending in running {
                let task = &mut tasks[pending.index];
                match pending.child.try_wait() {
                    Ok(Some(status)) if status.success() => {
                        info!("Process done: {}", task);
                        task.state = TaskState::Succeeded;
                    }
                    Ok(Some(status)) => {
                        warn!("Process failed: {} ({})", task, status);
                        task.state = TaskState::Failed(format!("exited with {}", status));
                    }
                    Ok(None) if pending.started.elapsed() >= self.task_timeout => {
                        warn!("Process timed out after {:?}: {}", self.task_timeout, task);
                        if let Err(e) = pending.child.kill().await {
                            warn!("Cannot kill {}: {}", task, e);
                        }
                        task.state = TaskState::Failed(format!(
                            "timed out after {:?}",
                            self.task_timeout
                        ));
                    }
                    Ok(None) => still_running.push(pending),
                    Err(e) => {
                        warn!("Cannot poll {}: {}", task, e);
                        task.state = TaskState::Failed(format!("wait failed: {}", e));
                    }
                }
            }

            running = still_running;
            if !running.is_empty() {
                debug!("{} process(es) outstanding, sleeping", running.len());
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        ExecutionReport { tasks }
    }
}

/// Run one command to completion and return its stdout.
///
/// Non-zero exit and running past `timeout` are both `ProcessFailure`.
pub async fn run_checked(program: &str, args: &[String], timeout: Duration) -> Result<String> {
    let line = std::iter::once(program.to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ");
    debug!("Running {}", line);

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PapertapeError::process_failure(&line, format!("spawn failed: {}", e)))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| PapertapeError::process_failure(&line, format!("timed out after {:?}", timeout)))?
        .map_err(|e| PapertapeError::process_failure(&line, format!("wait failed: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PapertapeError::process_failure(
            &line,
            format!("exited with {}: {}", output.status, stderr.trim()),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(tag: usize, script: &str) -> CommandTask {
        CommandTask::new(tag, "sh", ["-c", script])
    }

    fn executor() -> ProcessExecutor {
        ProcessExecutor::new(Duration::from_millis(20), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_all_succeed() {
        let report = executor().run_all(vec![sh(0, "exit 0"), sh(1, "sleep 0.1")]).await;
        assert!(report.all_succeeded());
        assert!(report.first_failure().is_none());
    }

    #[tokio::test]
    async fn test_failed_task_is_retired_and_reported() {
        let report = executor().run_all(vec![sh(0, "exit 0"), sh(1, "exit 3")]).await;

        assert!(!report.all_succeeded());
        assert_eq!(report.succeeded().map(|t| t.tag).collect::<Vec<_>>(), vec![0]);
        assert_eq!(report.failed().map(|t| t.tag).collect::<Vec<_>>(), vec![1]);
        assert!(matches!(
            report.first_failure(),
            Some(PapertapeError::ProcessFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_timeout_is_failure() {
        let executor = ProcessExecutor::new(Duration::from_millis(20), Duration::from_millis(200));
        let started = Instant::now();
        let report = executor.run_all(vec![sh(0, "sleep 30")]).await;

        assert!(started.elapsed() < Duration::from_secs(10));
        match report.tasks[0].state() {
            TaskState::Failed(reason) => assert!(reason.contains("timed out")),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_fails_without_hanging() {
        let task = CommandTask::new(0, "/nonexistent/papertape-test-binary", Vec::<String>::new());
        let report = executor().run_all(vec![task]).await;
        assert_eq!(report.failed().count(), 1);
    }

    #[tokio::test]
    async fn test_run_checked_captures_stdout() {
        let out = run_checked("sh", &["-c".to_string(), "echo ready".to_string()], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.trim(), "ready");

        let err = run_checked("sh", &["-c".to_string(), "exit 2".to_string()], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, PapertapeError::ProcessFailure { .. }));
    }
}
