//! The skill host: module loading, memory accounting, and invocation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use extism::{Manifest, PluginBuilder, UserData, Wasm};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use warden_audit::Decision;
use warden_policy::PolicyEngine;
use warden_store::Store;

use crate::error::{FaultReason, SkillFault, WasmError, WasmResult};
use crate::hostfns::{register_host_functions, HostState};
use crate::memory::estimate_memory_pages;

/// Exported functions probed, in order, when invoking a module.
pub(crate) const ENTRY_POINTS: &[&str] = &["random", "Random", "run", "main"];

/// Host limits and timeouts.
#[derive(Debug, Clone)]
pub struct WasmHostConfig {
    /// Aggregate memory budget across all loaded modules, in 64 KiB
    /// pages.
    pub aggregate_limit_pages: u32,
    /// Per-module linear memory cap, in pages.
    pub module_memory_limit_pages: u32,
    /// Wall-clock deadline per invocation.
    pub invoke_timeout: Duration,
    /// Faults before a module is quarantined.
    pub fault_threshold: i64,
}

impl Default for WasmHostConfig {
    fn default() -> Self {
        Self {
            aggregate_limit_pages: 1024,
            module_memory_limit_pages: 256,
            invoke_timeout: Duration::from_secs(30),
            fault_threshold: 3,
        }
    }
}

struct LoadedModule {
    plugin: Arc<StdMutex<extism::Plugin>>,
    pages: u32,
    source: PathBuf,
}

/// Host for sandboxed WASM skill modules.
///
/// The modules map and its memory accounting live under one lock that
/// is held across map updates only, never across guest execution:
/// invocation clones the module handle out of the map and runs the
/// guest on a blocking thread.
pub struct SkillHost {
    config: WasmHostConfig,
    modules: Mutex<HashMap<String, LoadedModule>>,
    store: Store,
    policy: Arc<PolicyEngine>,
}

impl SkillHost {
    /// Create a host.
    #[must_use]
    pub fn new(config: WasmHostConfig, store: Store, policy: Arc<PolicyEngine>) -> Self {
        Self {
            config,
            modules: Mutex::new(HashMap::new()),
            store,
            policy,
        }
    }

    /// Compile, admit, and instantiate a module from raw bytes.
    ///
    /// Admission enforces the aggregate budget: the module's estimated
    /// footprint (declared initial pages, minimum 1) plus the current
    /// aggregate *excluding any module of the same name* must fit. A
    /// same-name module is closed and de-accounted before the new
    /// instance goes live, so replacement never grows the aggregate
    /// beyond the budget.
    ///
    /// # Errors
    ///
    /// Returns `WASM_HOST_MEMORY_EXHAUSTED` when the budget would be
    /// exceeded, [`WasmError::InvalidModule`] for unparseable bytes,
    /// and `WASM_FAULT` when instantiation fails.
    pub async fn load_module_from_bytes(
        &self,
        name: &str,
        bytes: &[u8],
        source: &Path,
    ) -> WasmResult<()> {
        let estimated = estimate_memory_pages(name, bytes)?;

        let mut modules = self.modules.lock().await;

        let current: u64 = modules
            .iter()
            .filter(|(loaded_name, _)| loaded_name.as_str() != name)
            .map(|(_, module)| u64::from(module.pages))
            .sum();
        if current + u64::from(estimated) > u64::from(self.config.aggregate_limit_pages) {
            return Err(SkillFault::new(
                FaultReason::HostMemoryExhausted,
                name,
                format!(
                    "loading {estimated} pages would exceed the {} page budget ({current} in use)",
                    self.config.aggregate_limit_pages
                ),
            )
            .into());
        }

        // Replacement: close the old instance and drop its accounting
        // before the new one is instantiated.
        if modules.remove(name).is_some() {
            debug!(module = name, "Replacing loaded module");
        }

        let plugin = self.instantiate(name, bytes)?;
        modules.insert(
            name.to_string(),
            LoadedModule {
                plugin: Arc::new(StdMutex::new(plugin)),
                pages: estimated,
                source: source.to_path_buf(),
            },
        );

        info!(module = name, pages = estimated, "Skill module loaded");
        Ok(())
    }

    fn instantiate(&self, name: &str, bytes: &[u8]) -> WasmResult<extism::Plugin> {
        let manifest = Manifest::new([Wasm::data(bytes.to_vec())])
            .with_timeout(self.config.invoke_timeout)
            .with_memory_max(self.config.module_memory_limit_pages);

        let state = HostState {
            module: name.to_string(),
            store: self.store.clone(),
            policy: Arc::clone(&self.policy),
            handle: tokio::runtime::Handle::current(),
        };

        let builder = PluginBuilder::new(manifest).with_wasi(true);
        let builder = register_host_functions(builder, UserData::new(state));
        builder.build().map_err(|e| {
            SkillFault::new(FaultReason::Fault, name, format!("instantiation failed: {e}")).into()
        })
    }

    /// Invoke a module's entry point with no arguments.
    ///
    /// Probes the exports in [`ENTRY_POINTS`] order and calls the
    /// first one present. The invocation runs under its own
    /// wall-clock deadline; the caller's cancellation narrows it
    /// further. Faults are classified, counted, and - once the module
    /// crosses the fault threshold - quarantined with an audit record.
    ///
    /// # Errors
    ///
    /// Returns a classified [`SkillFault`] or a store error.
    pub async fn invoke_module(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> WasmResult<String> {
        if self.store.is_skill_quarantined(name).await? {
            return Err(SkillFault::new(
                FaultReason::Quarantined,
                name,
                "module is quarantined after repeated faults",
            )
            .into());
        }

        let plugin = {
            let modules = self.modules.lock().await;
            match modules.get(name) {
                Some(module) => Arc::clone(&module.plugin),
                None => {
                    return Err(SkillFault::new(
                        FaultReason::ModuleNotFound,
                        name,
                        "no module loaded under this name",
                    )
                    .into());
                },
            }
        };

        let cancel_handle = {
            let guard = lock_plugin(&plugin);
            guard.cancel_handle()
        };

        let module_name = name.to_string();
        let mut call = tokio::task::spawn_blocking(move || {
            let mut guard = lock_plugin(&plugin);
            let mut entry = None;
            for candidate in ENTRY_POINTS {
                if guard.function_exists(*candidate) {
                    entry = Some(*candidate);
                    break;
                }
            }
            match entry {
                Some(entry) => guard
                    .call::<&str, String>(entry, "")
                    .map_err(|e| e.to_string()),
                None => Err(String::from("__no_export__")),
            }
        });

        let outcome = tokio::select! {
            result = &mut call => Some(result),
            () = tokio::time::sleep(self.config.invoke_timeout) => None,
            () = cancel.cancelled() => {
                let _ = cancel_handle.cancel();
                return self.fault(name, FaultReason::Timeout, "canceled").await;
            },
        };

        match outcome {
            Some(Ok(Ok(output))) => Ok(output),
            Some(Ok(Err(message))) if message == "__no_export__" => {
                self.fault(
                    name,
                    FaultReason::NoExport,
                    &format!("none of {ENTRY_POINTS:?} exported"),
                )
                .await
            },
            Some(Ok(Err(message))) => {
                self.fault(name, FaultReason::classify(&message), &message).await
            },
            Some(Err(join_error)) => {
                self.fault(name, FaultReason::Fault, &join_error.to_string()).await
            },
            None => {
                let _ = cancel_handle.cancel();
                drop(call);
                warn!(module = %module_name, "Invocation hit its deadline");
                self.fault(name, FaultReason::Timeout, "invocation deadline exceeded")
                    .await
            },
        }
    }

    /// Record a fault, quarantining and auditing on threshold.
    async fn fault(
        &self,
        name: &str,
        reason: FaultReason,
        detail: &str,
    ) -> WasmResult<String> {
        if reason.counts_as_fault() {
            let quarantined = self
                .store
                .increment_skill_fault(name, self.config.fault_threshold)
                .await?;
            if quarantined {
                self.policy.audit_sink().record(
                    Decision::Quarantine,
                    "wasm.invoke",
                    &format!("fault threshold crossed ({reason})"),
                    self.policy.policy_version(),
                    name,
                );
            }
        }
        Err(SkillFault::new(reason, name, detail).into())
    }

    /// Whether a module is currently loaded.
    pub async fn has_module(&self, name: &str) -> bool {
        self.modules.lock().await.contains_key(name)
    }

    /// Unload a module and release its accounting.
    pub async fn remove_module(&self, name: &str) -> bool {
        self.modules.lock().await.remove(name).is_some()
    }

    /// The current aggregate footprint, in pages.
    pub async fn aggregate_pages(&self) -> u64 {
        self.modules
            .lock()
            .await
            .values()
            .map(|module| u64::from(module.pages))
            .sum()
    }

    /// The source path a module was loaded from.
    pub async fn module_source(&self, name: &str) -> Option<PathBuf> {
        self.modules
            .lock()
            .await
            .get(name)
            .map(|module| module.source.clone())
    }

    /// Unload all modules.
    pub async fn close(&self) {
        self.modules.lock().await.clear();
        info!("Skill host closed");
    }

    /// The host's configuration.
    #[must_use]
    pub fn config(&self) -> &WasmHostConfig {
        &self.config
    }
}

impl std::fmt::Debug for SkillHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillHost")
            .field("aggregate_limit_pages", &self.config.aggregate_limit_pages)
            .finish_non_exhaustive()
    }
}

fn lock_plugin(plugin: &Arc<StdMutex<extism::Plugin>>) -> std::sync::MutexGuard<'_, extism::Plugin> {
    match plugin.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
