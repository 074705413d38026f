//! Background task management
//!
//! Runs shell commands without blocking the caller. Output is appended to
//! a per-task buffer while the command runs, so polling never waits on
//! the process. Tasks stay registered until killed, or until reaped when a
//! retention period is configured.

mod ids;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{HearthError, Result};
use crate::proto::TaskInfo;
use crate::shell::{BlockFunc, ExecOptions, OutputSink, Shell, ShellOutput};

pub use ids::readable_id;

#[derive(Debug, Default)]
struct TaskOutput {
    stdout: String,
    stderr: String,
    done: bool,
    exit_code: Option<i32>,
    error: Option<String>,
    completed_at: Option<Instant>,
}

/// Point-in-time copy of a task's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSnapshot {
    pub stdout: String,
    pub stderr: String,
    pub done: bool,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

/// One spawned shell command
pub struct BackgroundTask {
    id: String,
    command: String,
    working_dir: PathBuf,
    started_at: Instant,
    output: RwLock<TaskOutput>,
    done_tx: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl BackgroundTask {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_done(&self) -> bool {
        self.output.read().done
    }

    /// Snapshot under the read lock; never waits for the process.
    pub fn snapshot(&self) -> OutputSnapshot {
        let out = self.output.read();
        OutputSnapshot {
            stdout: out.stdout.clone(),
            stderr: out.stderr.clone(),
            done: out.done,
            exit_code: out.exit_code,
            error: out.error.clone(),
        }
    }

    /// Resolves once the runner has recorded final output
    pub async fn wait(&self) {
        let mut rx = self.done_tx.subscribe();
        // Sender lives as long as the task, so this cannot fail
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn info(&self) -> TaskInfo {
        let snap = self.snapshot();
        TaskInfo {
            id: self.id.clone(),
            command: self.command.clone(),
            working_dir: self.working_dir.clone(),
            done: snap.done,
            exit_code: snap.exit_code,
            error: snap.error,
            stdout: snap.stdout,
            stderr: snap.stderr,
        }
    }

    fn finish(&self, result: std::result::Result<anyhow::Result<ShellOutput>, String>) {
        {
            let mut out = self.output.write();
            match result {
                Ok(Ok(shell)) => {
                    out.exit_code = Some(shell.exit_code);
                    out.error = shell.error_message();
                }
                Ok(Err(e)) => {
                    out.error = Some(e.to_string());
                }
                Err(panic) => {
                    out.error = Some(format!("background runner panicked: {}", panic));
                }
            }
            out.done = true;
            out.completed_at = Some(Instant::now());
        }
        self.done_tx.send_replace(true);
    }

    fn completed_before(&self, cutoff: Instant) -> bool {
        matches!(self.output.read().completed_at, Some(at) if at <= cutoff)
    }
}

impl OutputSink for BackgroundTask {
    fn stdout(&self, chunk: &str) {
        let mut out = self.output.write();
        if !out.done {
            out.stdout.push_str(chunk);
        }
    }

    fn stderr(&self, chunk: &str) {
        let mut out = self.output.write();
        if !out.done {
            out.stderr.push_str(chunk);
        }
    }
}

/// Registry of background tasks for one workspace
#[derive(Clone, Default)]
pub struct BackgroundManager {
    tasks: Arc<RwLock<HashMap<String, Arc<BackgroundTask>>>>,
    retention: Option<Duration>,
}

impl BackgroundManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reap completed tasks older than `retention` on each start/list
    pub fn with_retention(retention: Option<Duration>) -> Self {
        Self {
            tasks: Arc::default(),
            retention,
        }
    }

    /// Register and launch a command. Returns as soon as it is registered.
    pub fn start(
        &self,
        working_dir: impl Into<PathBuf>,
        block_funcs: Vec<BlockFunc>,
        command: impl Into<String>,
    ) -> Arc<BackgroundTask> {
        self.reap();

        let working_dir = working_dir.into();
        let command = command.into();
        let (done_tx, _) = watch::channel(false);

        let task = {
            let mut tasks = self.tasks.write();
            let id = readable_id(|candidate| tasks.contains_key(candidate));
            let task = Arc::new(BackgroundTask {
                id: id.clone(),
                command: command.clone(),
                working_dir: working_dir.clone(),
                started_at: Instant::now(),
                output: RwLock::new(TaskOutput::default()),
                done_tx,
                cancel: CancellationToken::new(),
            });
            tasks.insert(id, Arc::clone(&task));
            task
        };

        tracing::info!(id = %task.id, command = %command, "Background task started");

        let shell = Shell::new(working_dir).with_block_funcs(block_funcs);
        let runner_task = Arc::clone(&task);
        tokio::spawn(async move {
            let sink: Arc<dyn OutputSink> = runner_task.clone();
            let cancel = runner_task.cancel.clone();
            let command = runner_task.command.clone();
            let run = tokio::spawn(async move {
                shell
                    .exec(
                        &command,
                        ExecOptions {
                            sink: Some(sink),
                            ..Default::default()
                        },
                        &cancel,
                    )
                    .await
            });
            let result = run.await.map_err(|e| e.to_string());
            runner_task.finish(result);
            tracing::info!(id = %runner_task.id, "Background task finished");
        });

        task
    }

    pub fn get(&self, id: &str) -> Option<Arc<BackgroundTask>> {
        self.tasks.read().get(id).cloned()
    }

    /// Current output of a task. Never blocks on the running process.
    pub fn output(&self, id: &str) -> Result<OutputSnapshot> {
        self.get(id)
            .map(|t| t.snapshot())
            .ok_or_else(|| HearthError::TaskNotFound(id.to_string()))
    }

    /// Cancel a task, wait for its runner to finalize, then unregister it.
    pub async fn kill(&self, id: &str) -> Result<()> {
        let task = self
            .get(id)
            .ok_or_else(|| HearthError::TaskNotFound(id.to_string()))?;

        task.cancel.cancel();
        task.wait().await;
        self.tasks.write().remove(id);

        tracing::info!(id = %id, "Background task killed");
        Ok(())
    }

    pub fn list(&self) -> Vec<String> {
        self.reap();
        let mut ids: Vec<String> = self.tasks.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn list_info(&self) -> Vec<TaskInfo> {
        self.list()
            .iter()
            .filter_map(|id| self.get(id))
            .map(|t| t.info())
            .collect()
    }

    /// Kill every task (instance shutdown)
    pub async fn kill_all(&self) {
        let tasks: Vec<Arc<BackgroundTask>> = self.tasks.read().values().cloned().collect();
        for task in &tasks {
            task.cancel.cancel();
        }
        futures::future::join_all(tasks.iter().map(|t| t.wait())).await;
        self.tasks.write().clear();
        if !tasks.is_empty() {
            tracing::info!(count = tasks.len(), "Killed background tasks on shutdown");
        }
    }

    fn reap(&self) {
        let Some(retention) = self.retention else {
            return;
        };
        let Some(cutoff) = Instant::now().checked_sub(retention) else {
            return;
        };
        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|_, task| !task.completed_before(cutoff));
        let reaped = before - tasks.len();
        if reaped > 0 {
            tracing::debug!(reaped, "Reaped completed background tasks");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::block_commands;

    fn tmp() -> PathBuf {
        std::env::temp_dir()
    }

    async fn wait_done(task: &BackgroundTask) {
        tokio::time::timeout(Duration::from_secs(5), task.wait())
            .await
            .expect("task finished");
    }

    #[tokio::test]
    async fn start_returns_before_command_finishes() {
        let mgr = BackgroundManager::new();
        let begin = Instant::now();
        let task = mgr.start(tmp(), vec![], "sleep 5");
        assert!(begin.elapsed() < Duration::from_secs(1));
        assert!(!task.is_done());
        assert_eq!(mgr.list(), vec![task.id().to_string()]);
        mgr.kill(task.id()).await.unwrap();
    }

    #[tokio::test]
    async fn output_never_blocks_on_running_task() {
        let mgr = BackgroundManager::new();
        let task = mgr.start(tmp(), vec![], "echo started; sleep 10");

        for _ in 0..20 {
            let begin = Instant::now();
            let snap = mgr.output(task.id()).unwrap();
            assert!(begin.elapsed() < Duration::from_millis(50));
            assert!(!snap.done);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        mgr.kill(task.id()).await.unwrap();
    }

    #[tokio::test]
    async fn completed_output_is_stable() {
        let mgr = BackgroundManager::new();
        let task = mgr.start(tmp(), vec![], "echo out; echo err >&2; exit 2");
        wait_done(&task).await;

        let first = mgr.output(task.id()).unwrap();
        let second = mgr.output(task.id()).unwrap();
        assert_eq!(first, second);
        assert!(first.done);
        assert_eq!(first.stdout, "out\n");
        assert_eq!(first.stderr, "err\n");
        assert_eq!(first.exit_code, Some(2));
        assert!(first.error.is_some());
    }

    #[tokio::test]
    async fn kill_removes_task_and_marks_done() {
        let mgr = BackgroundManager::new();
        let task = mgr.start(tmp(), vec![], "echo partial; sleep 30");
        tokio::time::sleep(Duration::from_millis(200)).await;

        mgr.kill(task.id()).await.unwrap();

        assert!(!mgr.list().contains(&task.id().to_string()));
        assert!(mgr.get(task.id()).is_none());
        let snap = task.snapshot();
        assert!(snap.done);
        assert_eq!(snap.stdout, "partial\n");
    }

    #[tokio::test]
    async fn kill_returns_when_a_child_outlives_the_shell() {
        let mgr = BackgroundManager::new();
        let task = mgr.start(tmp(), vec![], "sleep 20 & echo hi");
        tokio::time::sleep(Duration::from_millis(200)).await;

        tokio::time::timeout(Duration::from_secs(5), mgr.kill(task.id()))
            .await
            .expect("kill returned")
            .unwrap();

        assert!(task.is_done());
        assert!(mgr.get(task.id()).is_none());
        assert_eq!(task.snapshot().stdout, "hi\n");
    }

    #[tokio::test]
    async fn kill_unknown_id_is_not_found() {
        let mgr = BackgroundManager::new();
        let err = mgr.kill("missing-task-00").await.unwrap_err();
        assert!(matches!(err, HearthError::TaskNotFound(_)));
        assert!(mgr.output("missing-task-00").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn blocked_command_still_yields_a_task() {
        let mgr = BackgroundManager::new();
        let task = mgr.start(tmp(), vec![block_commands(&["wget"])], "wget http://x");
        wait_done(&task).await;
        let snap = task.snapshot();
        assert_eq!(snap.exit_code, Some(crate::shell::BLOCKED_EXIT_CODE));
        assert!(snap.stderr.contains("wget"));
    }

    #[tokio::test]
    async fn concurrent_reads_during_kill_and_start() {
        let mgr = BackgroundManager::new();
        let long = mgr.start(tmp(), vec![], "sleep 10");

        let reader = {
            let mgr = mgr.clone();
            let id = long.id().to_string();
            tokio::spawn(async move {
                for _ in 0..50 {
                    let _ = mgr.output(&id);
                    let _ = mgr.list();
                    tokio::task::yield_now().await;
                }
            })
        };
        let extra = mgr.start(tmp(), vec![], "echo quick");
        mgr.kill(long.id()).await.unwrap();
        reader.await.unwrap();

        wait_done(&extra).await;
        assert_eq!(mgr.list(), vec![extra.id().to_string()]);
    }

    #[tokio::test]
    async fn retention_reaps_completed_tasks() {
        let mgr = BackgroundManager::with_retention(Some(Duration::from_millis(50)));
        let done = mgr.start(tmp(), vec![], "true");
        wait_done(&done).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let running = mgr.start(tmp(), vec![], "sleep 5");
        let ids = mgr.list();
        assert!(!ids.contains(&done.id().to_string()));
        assert!(ids.contains(&running.id().to_string()));
        mgr.kill_all().await;
        assert!(mgr.list().is_empty());
    }

    #[tokio::test]
    async fn tasks_kept_without_retention() {
        let mgr = BackgroundManager::new();
        let task = mgr.start(tmp(), vec![], "true");
        wait_done(&task).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(mgr.list().contains(&task.id().to_string()));
    }
}
