//! Source-change-driven skill rebuilds with staged atomic swap.
//!
//! The watcher observes a skills source directory. When a source file
//! changes it compiles to a `.staged.wasm` sibling, loads the staged
//! bytes into the [`SkillHost`](crate::SkillHost), and only then
//! renames staged over the final `.wasm`. A failed compile or load
//! leaves the previously active module - and its file - untouched.
//!
//! ```text
//! filesystem events (notify)
//!   → filter to source extensions
//!   → debounce per file
//!   → .abi sidecar check (v1)
//!   → external compiler → X.staged.wasm
//!   → host load (admission, instantiation)
//!   → rename staged → X.wasm
//!   → "tools-updated" event
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use warden_events::{EventBus, WardenEvent};

use crate::host::SkillHost;

/// Default debounce interval for file change events.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// The only ABI revision the host accepts.
const ABI_VERSION: &str = "v1";

/// User-facing notifications emitted by the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchNotification {
    /// Progress information ("Compiling X…", "Skill Loaded: X").
    Info(String),
    /// A failed compile/load; the previous module stays live.
    Error(String),
}

/// Configuration for the skill source watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Directory holding skill sources.
    pub source_dir: PathBuf,
    /// Source file extensions that trigger a rebuild.
    pub source_extensions: Vec<String>,
    /// Compiler argv template; `{input}` and `{output}` are replaced
    /// with the source path and the staged wasm path.
    pub compiler: Vec<String>,
    /// Debounce interval; changes within the window coalesce.
    pub debounce: Duration,
}

impl WatcherConfig {
    /// Config for a source directory with the given compiler template.
    #[must_use]
    pub fn new(source_dir: impl Into<PathBuf>, compiler: Vec<String>) -> Self {
        Self {
            source_dir: source_dir.into(),
            source_extensions: vec!["go".to_string()],
            compiler,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// Watches skill sources and drives staged reloads.
pub struct SkillWatcher {
    config: WatcherConfig,
    host: Arc<SkillHost>,
    events: Option<EventBus>,
    watcher: RecommendedWatcher,
    raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    notify_tx: mpsc::Sender<WatchNotification>,
}

impl SkillWatcher {
    /// Create a watcher. Returns the watcher and the notification
    /// receiver; call [`run()`](Self::run) to start the event loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem watcher cannot be
    /// initialized.
    pub fn new(
        config: WatcherConfig,
        host: Arc<SkillHost>,
        events: Option<EventBus>,
    ) -> notify::Result<(Self, mpsc::Receiver<WatchNotification>)> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::channel(64);

        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        )?;

        Ok((
            Self {
                config,
                host,
                events,
                watcher,
                raw_rx,
                notify_tx,
            },
            notify_rx,
        ))
    }

    /// Run the watch loop until the notify channel closes.
    pub async fn run(mut self) {
        if let Err(e) = self
            .watcher
            .watch(&self.config.source_dir, RecursiveMode::Recursive)
        {
            warn!(
                dir = %self.config.source_dir.display(),
                error = %e,
                "Failed to watch skills directory"
            );
            return;
        }
        info!(dir = %self.config.source_dir.display(), "Watching skill sources");

        let debounce = self.config.debounce;
        let mut pending: HashMap<PathBuf, tokio::time::Instant> = HashMap::new();

        loop {
            let next_deadline = pending.values().copied().min();

            tokio::select! {
                biased;

                () = async {
                    match next_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    let now = tokio::time::Instant::now();
                    let ready: Vec<PathBuf> = pending
                        .iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(path, _)| path.clone())
                        .collect();
                    for path in ready {
                        pending.remove(&path);
                        self.process_source_change(&path).await;
                    }
                }

                event = self.raw_rx.recv() => {
                    match event {
                        Some(Ok(event)) => {
                            self.queue_event(&event, &mut pending, debounce);
                        },
                        Some(Err(e)) => {
                            warn!(error = %e, "Filesystem watcher error");
                        },
                        None => {
                            debug!("Watcher channel closed, stopping");
                            break;
                        },
                    }
                }
            }
        }
    }

    fn queue_event(
        &self,
        event: &Event,
        pending: &mut HashMap<PathBuf, tokio::time::Instant>,
        debounce: Duration,
    ) {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => {},
            _ => return,
        }
        for path in &event.paths {
            let is_source = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| self.config.source_extensions.iter().any(|s| s == ext));
            if is_source {
                debug!(path = %path.display(), "Skill source changed");
                pending.insert(path.clone(), tokio::time::Instant::now() + debounce);
            }
        }
    }

    /// Run the full staged-reload pipeline for one source file.
    ///
    /// Public so embedders (and tests) can drive a rebuild without the
    /// filesystem event loop.
    pub async fn process_source_change(&self, source: &Path) {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if stem.is_empty() {
            return;
        }

        // ABI sidecar: absence means v1, anything but v1 blocks.
        let sidecar = source.with_extension("abi");
        if let Ok(content) = tokio::fs::read_to_string(&sidecar).await {
            let declared = content.trim();
            if declared != ABI_VERSION {
                self.notify(WatchNotification::Error(format!(
                    "Skill ABI error ({stem}): unsupported ABI version {declared:?}"
                )))
                .await;
                return;
            }
        }

        self.notify(WatchNotification::Info(format!("Compiling {stem}…")))
            .await;

        let staged = source.with_file_name(format!("{stem}.staged.wasm"));
        let final_path = source.with_file_name(format!("{stem}.wasm"));

        if let Err(message) = self.compile(source, &staged).await {
            self.notify(WatchNotification::Error(format!(
                "Skill compile error ({stem}): {message}"
            )))
            .await;
            return;
        }

        let bytes = match tokio::fs::read(&staged).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.notify(WatchNotification::Error(format!(
                    "Skill load error ({stem}): staged output unreadable: {e}"
                )))
                .await;
                return;
            },
        };

        // Load the staged bytes first; only a successful load may touch
        // the final .wasm or the live module table.
        if let Err(e) = self
            .host
            .load_module_from_bytes(&stem, &bytes, &final_path)
            .await
        {
            self.notify(WatchNotification::Error(format!(
                "Skill load error ({stem}): {e}"
            )))
            .await;
            return;
        }

        if let Err(e) = tokio::fs::rename(&staged, &final_path).await {
            self.notify(WatchNotification::Error(format!(
                "Skill swap error ({stem}): {e}"
            )))
            .await;
            return;
        }

        self.notify(WatchNotification::Info(format!("Skill Loaded: {stem}")))
            .await;

        if let Some(events) = &self.events {
            let basename = source
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            events.publish(WardenEvent::ToolsUpdated { source: basename });
        }
    }

    async fn compile(&self, source: &Path, staged: &Path) -> Result<(), String> {
        let argv: Vec<String> = self
            .config
            .compiler
            .iter()
            .map(|arg| {
                arg.replace("{input}", &source.display().to_string())
                    .replace("{output}", &staged.display().to_string())
            })
            .collect();
        let Some((program, args)) = argv.split_first() else {
            return Err("no compiler configured".to_string());
        };

        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| format!("failed to run compiler {program:?}: {e}"))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }

    async fn notify(&self, notification: WatchNotification) {
        match &notification {
            WatchNotification::Info(message) => info!("{message}"),
            WatchNotification::Error(message) => warn!("{message}"),
        }
        let _ = self.notify_tx.send(notification).await;
    }
}

impl std::fmt::Debug for SkillWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillWatcher")
            .field("source_dir", &self.config.source_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::WasmHostConfig;
    use warden_audit::AuditSink;
    use warden_policy::{PolicyEngine, PolicySnapshot};
    use warden_store::Store;

    async fn test_host(dir: &tempfile::TempDir) -> Arc<SkillHost> {
        let store = Store::in_memory().await.unwrap();
        let audit = Arc::new(AuditSink::open(dir.path().join("audit.jsonl")).unwrap());
        let policy = Arc::new(PolicyEngine::with_snapshot(
            PolicySnapshot::default_deny(),
            dir.path().join("policy.yaml"),
            audit,
        ));
        Arc::new(SkillHost::new(WasmHostConfig::default(), store, policy))
    }

    /// A stand-in compiler: copies a fixed payload into the output.
    fn write_compiler(dir: &Path, payload_cmd: &str) -> Vec<String> {
        vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            payload_cmd.replace("{dir}", &dir.display().to_string()),
        ]
    }

    async fn watcher_for(
        dir: &tempfile::TempDir,
        host: Arc<SkillHost>,
        compiler: Vec<String>,
    ) -> (SkillWatcher, mpsc::Receiver<WatchNotification>, EventBus) {
        let bus = EventBus::new();
        let config = WatcherConfig::new(dir.path(), compiler);
        let (watcher, notify_rx) =
            SkillWatcher::new(config, host, Some(bus.clone())).unwrap();
        (watcher, notify_rx, bus)
    }

    #[tokio::test]
    async fn test_successful_reload_and_swap() {
        let dir = tempfile::tempdir().unwrap();
        let host = test_host(&dir).await;
        let source = dir.path().join("random.go");
        std::fs::write(&source, "package main").unwrap();

        // Emits the 8-byte empty module into the staged output.
        let compiler = write_compiler(
            dir.path(),
            "printf '\\000asm\\001\\000\\000\\000' > {output}",
        );
        let (watcher, mut notify_rx, bus) = watcher_for(&dir, Arc::clone(&host), compiler).await;
        let mut events = bus.subscribe();

        watcher.process_source_change(&source).await;

        assert_eq!(
            notify_rx.recv().await.unwrap(),
            WatchNotification::Info("Compiling random…".to_string())
        );
        assert_eq!(
            notify_rx.recv().await.unwrap(),
            WatchNotification::Info("Skill Loaded: random".to_string())
        );
        assert!(host.has_module("random").await);
        assert!(dir.path().join("random.wasm").exists());
        assert!(!dir.path().join("random.staged.wasm").exists());

        let event = events.recv().await.unwrap();
        assert_eq!(event.event_type(), "skill.tools_updated");
    }

    #[tokio::test]
    async fn test_failed_load_preserves_previous_module() {
        let dir = tempfile::tempdir().unwrap();
        let host = test_host(&dir).await;
        let source = dir.path().join("random.go");
        std::fs::write(&source, "package main").unwrap();

        // First build succeeds.
        let good = write_compiler(
            dir.path(),
            "printf '\\000asm\\001\\000\\000\\000' > {output}",
        );
        let (watcher, mut notify_rx, _bus) = watcher_for(&dir, Arc::clone(&host), good).await;
        watcher.process_source_change(&source).await;
        notify_rx.recv().await.unwrap();
        notify_rx.recv().await.unwrap();
        assert!(host.has_module("random").await);
        let good_bytes = std::fs::read(dir.path().join("random.wasm")).unwrap();

        // Second build emits garbage: load fails, module and file stay.
        let bad = write_compiler(dir.path(), "printf 'not a wasm module' > {output}");
        let (watcher, mut notify_rx, _bus) = watcher_for(&dir, Arc::clone(&host), bad).await;
        watcher.process_source_change(&source).await;

        notify_rx.recv().await.unwrap(); // Compiling…
        match notify_rx.recv().await.unwrap() {
            WatchNotification::Error(message) => {
                assert!(message.contains("Skill load error (random)"), "{message}");
            },
            other => panic!("expected error notification, got {other:?}"),
        }
        assert!(host.has_module("random").await);
        assert_eq!(std::fs::read(dir.path().join("random.wasm")).unwrap(), good_bytes);
    }

    #[tokio::test]
    async fn test_compiler_failure_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let host = test_host(&dir).await;
        let source = dir.path().join("random.go");
        std::fs::write(&source, "package main").unwrap();

        let failing = write_compiler(dir.path(), "echo 'syntax error on line 3' >&2; exit 1");
        let (watcher, mut notify_rx, _bus) = watcher_for(&dir, Arc::clone(&host), failing).await;
        watcher.process_source_change(&source).await;

        notify_rx.recv().await.unwrap(); // Compiling…
        match notify_rx.recv().await.unwrap() {
            WatchNotification::Error(message) => {
                assert!(message.contains("Skill compile error (random)"));
                assert!(message.contains("syntax error on line 3"));
            },
            other => panic!("expected error notification, got {other:?}"),
        }
        assert!(!host.has_module("random").await);
    }

    #[tokio::test]
    async fn test_unsupported_abi_blocks_compile() {
        let dir = tempfile::tempdir().unwrap();
        let host = test_host(&dir).await;
        let source = dir.path().join("random.go");
        std::fs::write(&source, "package main").unwrap();
        std::fs::write(dir.path().join("random.abi"), "v2\n").unwrap();

        let compiler = write_compiler(
            dir.path(),
            "printf '\\000asm\\001\\000\\000\\000' > {output}",
        );
        let (watcher, mut notify_rx, _bus) = watcher_for(&dir, Arc::clone(&host), compiler).await;
        watcher.process_source_change(&source).await;

        match notify_rx.recv().await.unwrap() {
            WatchNotification::Error(message) => {
                assert!(message.contains("unsupported ABI version"));
            },
            other => panic!("expected ABI error, got {other:?}"),
        }
        assert!(!host.has_module("random").await);
    }

    #[tokio::test]
    async fn test_explicit_v1_sidecar_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let host = test_host(&dir).await;
        let source = dir.path().join("random.go");
        std::fs::write(&source, "package main").unwrap();
        std::fs::write(dir.path().join("random.abi"), "v1").unwrap();

        let compiler = write_compiler(
            dir.path(),
            "printf '\\000asm\\001\\000\\000\\000' > {output}",
        );
        let (watcher, mut notify_rx, _bus) = watcher_for(&dir, Arc::clone(&host), compiler).await;
        watcher.process_source_change(&source).await;

        notify_rx.recv().await.unwrap(); // Compiling…
        assert_eq!(
            notify_rx.recv().await.unwrap(),
            WatchNotification::Info("Skill Loaded: random".to_string())
        );
    }
}
