use crate::error::{ProjectError, Result};
use crate::hosts::{DocumentationHost, EditorHost};
use crate::paths;
use crate::runner::{RunCompletion, RunHandle, ToolRunner, ToolSpec};
use crate::scheduler::ReloadScheduler;
use log::{debug, error, info, warn};
use pkgnav_metadata::{
    build_tree, parse_record, NodeKind, PackageKind, PackageRecord, PackageTree, TreeNode,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time;

/// Load pipeline state. `Running` means a tool invocation is in
/// flight; `Failed` keeps the previous snapshot interactable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Running,
    Failed,
}

/// Notifications published to display collaborators.
#[derive(Debug, Clone)]
pub enum ProjectEvent {
    TreeReplaced(Arc<PackageTree>),
    LoadFailed { reason: String },
}

/// Immutable view of the project, replaced atomically on every state
/// change. Safe to read from any task without locking.
#[derive(Debug, Clone)]
pub struct ProjectSnapshot {
    pub state: LoadState,
    pub workdir: PathBuf,
    pub record: Option<Arc<PackageRecord>>,
    pub tree: Option<Arc<PackageTree>>,
}

/// Tool invocation and debounce settings. The default runs
/// `go list -e -json .` with a one second quiet window.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment applied to every run.
    pub env: Vec<(String, String)>,
    pub debounce: Duration,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        let spec = ToolSpec::go_list(".");
        Self {
            program: spec.program,
            args: spec.args,
            env: Vec::new(),
            debounce: ReloadScheduler::DEFAULT_QUIET,
        }
    }
}

impl ProjectConfig {
    fn spec_for(&self, workdir: &Path) -> ToolSpec {
        ToolSpec {
            program: self.program.clone(),
            args: self.args.clone(),
            workdir: workdir.to_path_buf(),
            env: self.env.clone(),
        }
    }
}

enum ProjectCommand {
    SetPath(PathBuf),
    SetRecord(Box<PackageRecord>),
    Reload,
    EditorSaved(PathBuf),
    Shutdown,
}

/// One Go package project: owns the working directory, the tool
/// runner, the reload scheduler, and the current record/tree snapshot.
/// Cloning shares the underlying project; dropping the last clone
/// shuts the control loop down and kills any run still in flight.
#[derive(Clone)]
pub struct PackageProject {
    inner: Arc<ProjectInner>,
}

struct ProjectInner {
    command_tx: mpsc::Sender<ProjectCommand>,
    event_tx: broadcast::Sender<ProjectEvent>,
    snapshot_tx: watch::Sender<ProjectSnapshot>,
    editor: Arc<dyn EditorHost>,
    docs: Arc<dyn DocumentationHost>,
}

impl PackageProject {
    /// Opens a project rooted at `workdir` with the default tool
    /// invocation. Does not trigger a load by itself.
    #[must_use]
    pub fn open(
        workdir: impl Into<PathBuf>,
        editor: Arc<dyn EditorHost>,
        docs: Arc<dyn DocumentationHost>,
    ) -> Self {
        Self::with_config(workdir, ProjectConfig::default(), editor, docs)
    }

    #[must_use]
    pub fn with_config(
        workdir: impl Into<PathBuf>,
        config: ProjectConfig,
        editor: Arc<dyn EditorHost>,
        docs: Arc<dyn DocumentationHost>,
    ) -> Self {
        let workdir = workdir.into();
        let (command_tx, command_rx) = mpsc::channel(16);
        let (completion_tx, completion_rx) = mpsc::channel(8);
        let (event_tx, _) = broadcast::channel(32);
        let (snapshot_tx, _) = watch::channel(ProjectSnapshot {
            state: LoadState::Idle,
            workdir: workdir.clone(),
            record: None,
            tree: None,
        });

        let control = ProjectLoop {
            scheduler: ReloadScheduler::new(config.debounce),
            config,
            runner: ToolRunner::new(completion_tx),
            workdir,
            state: LoadState::Idle,
            record: None,
            tree: None,
            current: None,
            follow_up: false,
            event_tx: event_tx.clone(),
            snapshot_tx: snapshot_tx.clone(),
        };
        tokio::spawn(control.run(command_rx, completion_rx));

        Self {
            inner: Arc::new(ProjectInner {
                command_tx,
                event_tx,
                snapshot_tx,
                editor,
                docs,
            }),
        }
    }

    /// Re-roots the project at `dir`. Cancels any run in flight and
    /// any pending debounce; does not itself trigger a load.
    pub async fn set_path(&self, dir: impl Into<PathBuf>) -> Result<()> {
        self.send(ProjectCommand::SetPath(dir.into())).await
    }

    /// Seeds the project with a record the host already obtained (for
    /// example during workspace discovery), skipping the tool run.
    pub async fn set_record(&self, record: PackageRecord) -> Result<()> {
        self.send(ProjectCommand::SetRecord(Box::new(record))).await
    }

    /// Requests a metadata reload. While a run is in flight, further
    /// requests coalesce into a single follow-up run.
    pub async fn reload(&self) -> Result<()> {
        self.send(ProjectCommand::Reload).await
    }

    /// Editor-save notification. Saves of files tracked as `Source`
    /// nodes arm the debounced reload; anything else is ignored.
    pub async fn notify_saved(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.send(ProjectCommand::EditorSaved(path.into())).await
    }

    async fn send(&self, command: ProjectCommand) -> Result<()> {
        self.inner
            .command_tx
            .send(command)
            .await
            .map_err(|_| ProjectError::Closed)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProjectEvent> {
        self.inner.event_tx.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> ProjectSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    #[must_use]
    pub fn snapshot_stream(&self) -> watch::Receiver<ProjectSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Package identifier (import path) of the current record.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.snapshot()
            .record
            .map(|record| record.import_path.clone())
    }

    /// Directory backing the package; the configured working directory
    /// until a record has been loaded.
    #[must_use]
    pub fn dir(&self) -> PathBuf {
        let snapshot = self.snapshot();
        snapshot
            .record
            .map_or(snapshot.workdir, |record| record.dir.clone())
    }

    #[must_use]
    pub fn kind(&self) -> Option<PackageKind> {
        self.snapshot().record.map(|record| record.kind())
    }

    /// Mime-like tag for pickers and icons; a project with nothing
    /// loaded yet presents as a library.
    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        self.kind().unwrap_or(PackageKind::Library).mime_type()
    }

    /// Source file names of the current tree, in display order.
    #[must_use]
    pub fn file_name_list(&self) -> Vec<String> {
        self.snapshot()
            .tree
            .map(|tree| tree.source_names())
            .unwrap_or_default()
    }

    /// Resolved source paths of the current tree, in display order.
    #[must_use]
    pub fn file_path_list(&self) -> Vec<PathBuf> {
        self.snapshot()
            .tree
            .map(|tree| tree.source_paths())
            .unwrap_or_default()
    }

    /// Resolves a bare file name against the package directory.
    #[must_use]
    pub fn resolve(&self, file: impl AsRef<Path>) -> PathBuf {
        self.dir().join(file)
    }

    /// Substitution variables describing the project directory.
    #[must_use]
    pub fn project_info(&self) -> HashMap<String, String> {
        let dir = self.dir();
        let name = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = dir.display().to_string();
        HashMap::from([
            ("PROJECTPATH".to_string(), dir.clone()),
            ("PROJECTNAME".to_string(), name),
            ("PROJECTDIR".to_string(), dir),
        ])
    }

    /// Substitution variables describing the build target.
    #[must_use]
    pub fn target_info(&self) -> HashMap<String, String> {
        let dir = self.dir();
        let name = self.name().unwrap_or_default();
        let target = dir.join(&name).display().to_string();
        let dir = dir.display().to_string();
        HashMap::from([
            ("WORKDIR".to_string(), dir.clone()),
            ("TARGETPATH".to_string(), target),
            ("TARGETNAME".to_string(), name),
            ("TARGETDIR".to_string(), dir),
        ])
    }

    /// Dispatches a node activation: sources open in the editor,
    /// imports and dependencies open in the documentation browser,
    /// anything else is ignored.
    pub fn activate(&self, node: &TreeNode) {
        match node.kind {
            NodeKind::Source => {
                if let Some(path) = &node.resolved_path {
                    self.inner.editor.open_file(path, true);
                }
            }
            NodeKind::Import | NodeKind::Dependency => {
                self.inner.docs.open_reference(&node.label);
                self.inner.docs.bring_to_front();
            }
            NodeKind::Root => {}
        }
    }
}

impl Drop for PackageProject {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            let _ = self.inner.command_tx.try_send(ProjectCommand::Shutdown);
        }
    }
}

struct ProjectLoop {
    config: ProjectConfig,
    runner: ToolRunner,
    scheduler: ReloadScheduler,
    workdir: PathBuf,
    state: LoadState,
    record: Option<Arc<PackageRecord>>,
    tree: Option<Arc<PackageTree>>,
    current: Option<RunHandle>,
    follow_up: bool,
    event_tx: broadcast::Sender<ProjectEvent>,
    snapshot_tx: watch::Sender<ProjectSnapshot>,
}

impl ProjectLoop {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<ProjectCommand>,
        mut completion_rx: mpsc::Receiver<RunCompletion>,
    ) {
        loop {
            let deadline = self.scheduler.next_deadline();

            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(ProjectCommand::SetPath(dir)) => self.set_path(dir),
                    Some(ProjectCommand::SetRecord(record)) => {
                        self.drop_current_run();
                        self.install_record(*record);
                    }
                    Some(ProjectCommand::Reload) => self.start_or_queue(),
                    Some(ProjectCommand::EditorSaved(path)) => self.editor_saved(&path),
                    Some(ProjectCommand::Shutdown) | None => break,
                },
                Some(done) = completion_rx.recv() => self.handle_completion(done),
                () = async {
                    if let Some(deadline) = deadline {
                        time::sleep_until(deadline).await;
                    }
                }, if deadline.is_some() => {
                    if self.scheduler.fire_if_due() {
                        debug!("debounced reload firing");
                        self.start_or_queue();
                    }
                }
            }
        }
        // Dropping the loop drops the current run handle, which kills
        // a child still in flight.
    }

    fn publish_snapshot(&self) {
        let _ = self.snapshot_tx.send(ProjectSnapshot {
            state: self.state,
            workdir: self.workdir.clone(),
            record: self.record.clone(),
            tree: self.tree.clone(),
        });
    }

    fn drop_current_run(&mut self) {
        if let Some(handle) = self.current.take() {
            handle.cancel();
        }
        self.follow_up = false;
    }

    fn set_path(&mut self, dir: PathBuf) {
        // A run in flight belongs to the old directory.
        self.drop_current_run();
        self.scheduler.cancel();
        self.workdir = dir;
        self.state = LoadState::Idle;
        self.publish_snapshot();
    }

    fn start_or_queue(&mut self) {
        if self.state == LoadState::Running {
            // Coalesce into one follow-up run after the current one
            // completes; two concurrent runs would interleave output
            // over the single current snapshot.
            self.follow_up = true;
            return;
        }
        info!("loading package metadata in {}", self.workdir.display());
        let spec = self.config.spec_for(&self.workdir);
        self.current = Some(self.runner.start(&spec));
        self.state = LoadState::Running;
        self.publish_snapshot();
    }

    fn editor_saved(&mut self, path: &Path) {
        let tracked = self.tree.as_ref().is_some_and(|tree| {
            tree.source_paths()
                .iter()
                .any(|source| paths::same_file(path, source))
        });
        if tracked {
            debug!("tracked source saved: {}", path.display());
            self.scheduler.request();
        }
    }

    fn handle_completion(&mut self, done: RunCompletion) {
        match &self.current {
            Some(handle) if handle.id() == done.id => {}
            _ => {
                // Superseded or cancelled run; only the most recently
                // started run may update the snapshot.
                debug!("discarding stale completion for {:?}", done.id);
                return;
            }
        }
        self.current = None;

        match done.outcome {
            Ok(output) if output.status.success() => match parse_record(&output.stdout) {
                Ok(record) => self.install_record(record),
                Err(err) => self.fail(ProjectError::Parse(err)),
            },
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                self.fail(ProjectError::ToolExit {
                    tool: self.config.program.clone(),
                    status: output.status,
                    stderr,
                });
            }
            Err(err) => self.fail(ProjectError::ToolLaunch {
                tool: self.config.program.clone(),
                source: err,
            }),
        }

        if self.follow_up {
            self.follow_up = false;
            self.start_or_queue();
        }
    }

    fn install_record(&mut self, record: PackageRecord) {
        if let Some(diagnostic) = record.tool_error() {
            warn!("{}: {diagnostic}", record.import_path);
        }
        // Re-root at the directory the tool reported rather than the
        // one the run was configured with.
        self.workdir = record.dir.clone();
        let tree = Arc::new(build_tree(&record));
        self.record = Some(Arc::new(record));
        self.tree = Some(tree.clone());
        self.state = LoadState::Idle;
        self.publish_snapshot();
        let _ = self.event_tx.send(ProjectEvent::TreeReplaced(tree));
    }

    fn fail(&mut self, err: ProjectError) {
        error!("package metadata load failed: {err}");
        self.state = LoadState::Failed;
        // The previous record and tree stay current; a transient tool
        // failure must not blank the view.
        self.publish_snapshot();
        let _ = self.event_tx.send(ProjectEvent::LoadFailed {
            reason: err.to_string(),
        });
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::os::unix::process::ExitStatusExt;
    use std::process::{ExitStatus, Output};
    use tokio::sync::broadcast::error::TryRecvError;

    fn demo_record() -> PackageRecord {
        PackageRecord {
            import_path: "demo/pkg".to_string(),
            dir: PathBuf::from("/src/demo/pkg"),
            name: "pkg".to_string(),
            source_files: vec!["a.go".to_string(), "b.go".to_string()],
            imports: vec!["fmt".to_string()],
            dependencies: vec!["fmt".to_string(), "strings".to_string()],
            error: None,
        }
    }

    fn test_loop() -> (
        ProjectLoop,
        broadcast::Receiver<ProjectEvent>,
        mpsc::Receiver<RunCompletion>,
    ) {
        let (completion_tx, completion_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = broadcast::channel(16);
        let (snapshot_tx, _) = watch::channel(ProjectSnapshot {
            state: LoadState::Idle,
            workdir: PathBuf::from("/src/demo/pkg"),
            record: None,
            tree: None,
        });
        let control = ProjectLoop {
            config: ProjectConfig {
                program: "true".to_string(),
                args: Vec::new(),
                env: Vec::new(),
                debounce: Duration::from_millis(10),
            },
            runner: ToolRunner::new(completion_tx),
            scheduler: ReloadScheduler::new(Duration::from_millis(10)),
            workdir: PathBuf::from("/src/demo/pkg"),
            state: LoadState::Idle,
            record: None,
            tree: None,
            current: None,
            follow_up: false,
            event_tx,
            snapshot_tx,
        };
        (control, event_rx, completion_rx)
    }

    fn success_output(stdout: &[u8]) -> Output {
        Output {
            status: ExitStatus::from_raw(0),
            stdout: stdout.to_vec(),
            stderr: Vec::new(),
        }
    }

    fn failed_output(stderr: &[u8]) -> Output {
        Output {
            // Wait status encoding: exit code 1.
            status: ExitStatus::from_raw(1 << 8),
            stdout: Vec::new(),
            stderr: stderr.to_vec(),
        }
    }

    #[tokio::test]
    async fn stale_completion_is_discarded() {
        let (mut control, mut events, _completions) = test_loop();
        control.current = Some(ToolRunner::test_handle(2));
        control.state = LoadState::Running;

        control.handle_completion(RunCompletion {
            id: ToolRunner::test_id(1),
            outcome: Ok(success_output(
                br#"{"ImportPath":"old/pkg","Dir":"/src/old","Name":"old"}"#,
            )),
        });

        assert_eq!(control.state, LoadState::Running);
        assert!(control.tree.is_none());
        assert!(control.current.is_some());
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn failed_run_retains_previous_tree_and_reports_once() {
        let (mut control, mut events, _completions) = test_loop();
        control.install_record(demo_record());
        let before = control.tree.clone().expect("tree installed");
        assert!(matches!(
            events.try_recv(),
            Ok(ProjectEvent::TreeReplaced(_))
        ));

        control.current = Some(ToolRunner::test_handle(1));
        control.state = LoadState::Running;
        control.handle_completion(RunCompletion {
            id: ToolRunner::test_id(1),
            outcome: Ok(failed_output(b"go: build constraints exclude all Go files")),
        });

        assert_eq!(control.state, LoadState::Failed);
        assert_eq!(control.tree.as_ref(), Some(&before));
        assert!(matches!(
            events.try_recv(),
            Ok(ProjectEvent::LoadFailed { .. })
        ));
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn malformed_output_fails_without_installing_a_tree() {
        let (mut control, mut events, _completions) = test_loop();
        control.current = Some(ToolRunner::test_handle(1));
        control.state = LoadState::Running;

        control.handle_completion(RunCompletion {
            id: ToolRunner::test_id(1),
            outcome: Ok(success_output(b"go: cannot find main module")),
        });

        assert_eq!(control.state, LoadState::Failed);
        assert!(control.tree.is_none());
        assert!(matches!(
            events.try_recv(),
            Ok(ProjectEvent::LoadFailed { .. })
        ));
    }

    #[tokio::test]
    async fn reload_while_running_coalesces_into_one_follow_up() {
        let (mut control, _events, _completions) = test_loop();
        control.current = Some(ToolRunner::test_handle(1));
        control.state = LoadState::Running;

        control.start_or_queue();
        control.start_or_queue();
        assert!(control.follow_up);
        assert_eq!(
            control.current.as_ref().map(RunHandle::id),
            Some(ToolRunner::test_id(1)),
            "no second concurrent run may start"
        );

        control.handle_completion(RunCompletion {
            id: ToolRunner::test_id(1),
            outcome: Ok(failed_output(b"boom")),
        });

        // The queued follow-up starts even after a failing run.
        assert!(!control.follow_up);
        assert_eq!(control.state, LoadState::Running);
        assert!(control.current.is_some());
    }

    #[tokio::test]
    async fn tracked_save_arms_the_scheduler_and_untracked_does_not() {
        let (mut control, _events, _completions) = test_loop();
        control.install_record(demo_record());

        control.editor_saved(Path::new("/src/demo/pkg/./a.go"));
        assert!(control.scheduler.is_armed());

        control.scheduler.cancel();
        control.editor_saved(Path::new("/src/demo/pkg/unrelated.txt"));
        assert!(!control.scheduler.is_armed());
    }

    #[tokio::test]
    async fn set_path_resets_state_and_disarms_the_scheduler() {
        let (mut control, _events, _completions) = test_loop();
        control.install_record(demo_record());
        control.scheduler.request();
        control.current = Some(ToolRunner::test_handle(1));
        control.state = LoadState::Running;
        control.follow_up = true;

        control.set_path(PathBuf::from("/src/other"));

        assert_eq!(control.state, LoadState::Idle);
        assert_eq!(control.workdir, PathBuf::from("/src/other"));
        assert!(control.current.is_none());
        assert!(!control.follow_up);
        assert!(!control.scheduler.is_armed());
        // The previous snapshot stays current until a new load.
        assert!(control.tree.is_some());
    }

    #[tokio::test]
    async fn launch_error_reports_failure() {
        let (mut control, mut events, _completions) = test_loop();
        control.current = Some(ToolRunner::test_handle(1));
        control.state = LoadState::Running;

        control.handle_completion(RunCompletion {
            id: ToolRunner::test_id(1),
            outcome: Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such file or directory",
            )),
        });

        assert_eq!(control.state, LoadState::Failed);
        match events.try_recv() {
            Ok(ProjectEvent::LoadFailed { reason }) => {
                assert!(reason.contains("failed to launch"));
            }
            other => panic!("expected LoadFailed, got {other:?}"),
        }
    }
}
