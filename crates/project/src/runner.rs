use log::debug;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

/// How one tool invocation is launched.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    /// Extra environment applied over the inherited one.
    pub env: Vec<(String, String)>,
}

impl ToolSpec {
    /// The metadata invocation: `go list -e -json .` in `workdir`.
    #[must_use]
    pub fn go_list(workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: "go".to_string(),
            args: ["list", "-e", "-json", "."]
                .iter()
                .map(ToString::to_string)
                .collect(),
            workdir: workdir.into(),
            env: Vec::new(),
        }
    }
}

/// Identifies one run; completions are matched against the handle the
/// orchestrator kept, so superseded results can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(u64);

/// Terminal report for one run: the process output, or the error that
/// kept it from launching.
#[derive(Debug)]
pub struct RunCompletion {
    pub id: RunId,
    pub outcome: std::io::Result<Output>,
}

/// Keeps the run alive. Cancelling (or just dropping) the handle kills
/// the child process and suppresses its completion event; a completion
/// already in flight may still race through and must be discarded by id
/// on the receiving side.
#[derive(Debug)]
pub struct RunHandle {
    id: RunId,
    cancel_tx: oneshot::Sender<()>,
}

impl RunHandle {
    #[must_use]
    pub const fn id(&self) -> RunId {
        self.id
    }

    pub fn cancel(self) {
        let _ = self.cancel_tx.send(());
    }
}

/// Launches tool runs and delivers exactly one [`RunCompletion`] per
/// uncancelled start into the channel given at construction. Runs are
/// not serialized here; cancellation policy belongs to the owner.
pub struct ToolRunner {
    completion_tx: mpsc::Sender<RunCompletion>,
    next_id: u64,
}

impl ToolRunner {
    #[must_use]
    pub const fn new(completion_tx: mpsc::Sender<RunCompletion>) -> Self {
        Self {
            completion_tx,
            next_id: 0,
        }
    }

    pub fn start(&mut self, spec: &ToolSpec) -> RunHandle {
        self.next_id += 1;
        let id = RunId(self.next_id);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let tx = self.completion_tx.clone();

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.workdir)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tokio::spawn(async move {
            let child = match command.spawn() {
                Ok(child) => child,
                Err(err) => {
                    let _ = tx.send(RunCompletion { id, outcome: Err(err) }).await;
                    return;
                }
            };
            let wait = child.wait_with_output();
            tokio::pin!(wait);
            tokio::select! {
                _ = cancel_rx => {
                    // Dropping the wait future drops the child, and
                    // kill_on_drop tears the process down. No
                    // completion is sent for a cancelled run.
                    debug!("run {id:?} cancelled");
                }
                outcome = &mut wait => {
                    let _ = tx.send(RunCompletion { id, outcome }).await;
                }
            }
        });

        RunHandle { id, cancel_tx }
    }

    #[cfg(test)]
    pub(crate) fn test_handle(raw: u64) -> RunHandle {
        let (cancel_tx, _cancel_rx) = oneshot::channel();
        RunHandle {
            id: RunId(raw),
            cancel_tx,
        }
    }

    #[cfg(test)]
    pub(crate) const fn test_id(raw: u64) -> RunId {
        RunId(raw)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(workdir: &std::path::Path, script: &str) -> ToolSpec {
        ToolSpec {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            workdir: workdir.to_path_buf(),
            env: Vec::new(),
        }
    }

    #[tokio::test]
    async fn completion_carries_captured_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, mut rx) = mpsc::channel(4);
        let mut runner = ToolRunner::new(tx);

        let handle = runner.start(&sh(dir.path(), "echo out; echo err >&2"));
        let done = rx.recv().await.expect("completion");
        assert_eq!(done.id, handle.id());

        let output = done.outcome.expect("output");
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "out");
        assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "err");
    }

    #[tokio::test]
    async fn nonzero_exit_is_still_a_completion() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, mut rx) = mpsc::channel(4);
        let mut runner = ToolRunner::new(tx);

        let _handle = runner.start(&sh(dir.path(), "exit 3"));
        let done = rx.recv().await.expect("completion");
        let output = done.outcome.expect("output");
        assert_eq!(output.status.code(), Some(3));
    }

    #[tokio::test]
    async fn launch_failure_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, mut rx) = mpsc::channel(4);
        let mut runner = ToolRunner::new(tx);

        let spec = ToolSpec {
            program: dir.path().join("no-such-tool").display().to_string(),
            args: Vec::new(),
            workdir: dir.path().to_path_buf(),
            env: Vec::new(),
        };
        let _handle = runner.start(&spec);
        let done = rx.recv().await.expect("completion");
        assert!(done.outcome.is_err());
    }

    #[tokio::test]
    async fn env_overrides_reach_the_child() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, mut rx) = mpsc::channel(4);
        let mut runner = ToolRunner::new(tx);

        let mut spec = sh(dir.path(), "printf '%s' \"$PKGNAV_TEST_MARK\"");
        spec.env.push(("PKGNAV_TEST_MARK".to_string(), "mark".to_string()));
        let _handle = runner.start(&spec);
        let done = rx.recv().await.expect("completion");
        let output = done.outcome.expect("output");
        assert_eq!(String::from_utf8_lossy(&output.stdout), "mark");
    }

    #[tokio::test]
    async fn cancelled_run_never_completes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, mut rx) = mpsc::channel(4);
        let mut runner = ToolRunner::new(tx);

        let handle = runner.start(&sh(dir.path(), "sleep 10; echo late"));
        handle.cancel();

        let raced = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(raced.is_err(), "cancelled run must not deliver a completion");
    }

    #[tokio::test]
    async fn run_ids_are_distinct_per_start() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, _rx) = mpsc::channel(4);
        let mut runner = ToolRunner::new(tx);

        let a = runner.start(&sh(dir.path(), "true"));
        let b = runner.start(&sh(dir.path(), "true"));
        assert_ne!(a.id(), b.id());
    }
}
