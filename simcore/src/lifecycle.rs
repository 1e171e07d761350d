// Copyright (c) Simcore Contributors
// SPDX-License-Identifier: Apache-2.0

//! The Lifecycle Manager (§4): cascading delete, load‑on‑startup, save‑all,
//! and the per‑basis runtime (kernel handle + writer executor + listener
//! bridge) that exists for as long as a basis does.
//!
//! The mutation helpers here (`delete_vector_set`, `delete_recommendation`,
//! `delete_basis`) are pure with respect to *which* executor calls them:
//! the dispatcher is responsible for running them on the writer that owns
//! the affected basis. They snapshot the catalog's reverse indices before
//! iterating, which is the fix §9 calls for: the source iterates
//! `rtargetsOf.get(key)` while enqueueing further deletes against the same
//! live structure.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use simcore_kernel_iface::{dump_path, SimBasisKernel};

use crate::catalog::{rkey, KeyCatalog};
use crate::error::{EngineError, EngineResult};
use crate::executor::WriterExecutor;
use crate::listener::ListenerBridge;
use crate::metrics::Metrics;

/// Everything that exists for the lifetime of one live basis: the kernel
/// instance, its dedicated writer executor, its listener bridge, and a flag
/// guarding against overlapping snapshot saves (§4.5).
pub struct BasisRuntime {
    pub kernel: Arc<dyn SimBasisKernel>,
    pub writer: WriterExecutor,
    listener: ListenerBridge,
    saving: Arc<AtomicBool>,
}

impl BasisRuntime {
    /// Takes an already-spawned `writer`: the caller (the dispatcher's
    /// `bmk`/`bload`) constructs the writer executor first and spawns the
    /// Listener Bridge onto it before this runtime exists, so that bridge
    /// never ends up bound to the wrong runtime (§4.1).
    pub fn new(kernel: Arc<dyn SimBasisKernel>, writer: WriterExecutor, listener: ListenerBridge) -> Self {
        Self {
            kernel,
            writer,
            listener,
            saving: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Saves this basis's dump unless a previous save is still in flight, in
    /// which case this tick is a no‑op (§4.5).
    pub async fn save_if_idle(&self, savepath: &Path, bkey: &str, metrics: &Metrics) {
        if self.saving.swap(true, Ordering::SeqCst) {
            metrics.record_cron_skip();
            tracing::debug!(basis = %bkey, "skipping snapshot: previous save still in flight");
            return;
        }
        let path = dump_path(savepath, bkey);
        let result = self.kernel.bsave(&path).await;
        self.saving.store(false, Ordering::SeqCst);
        if let Err(error) = result {
            tracing::warn!(basis = %bkey, %error, "basis snapshot failed");
        }
    }

    pub async fn shutdown(&self) {
        self.listener.shutdown().await;
        self.writer.shutdown().await;
    }
}

/// All live bases, keyed by `bkey`. Owned by the engine; the management
/// executor is the only place entries are inserted or removed.
#[derive(Default)]
pub struct BasisRegistry {
    runtimes: DashMap<String, Arc<BasisRuntime>>,
}

impl BasisRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bkey: &str) -> Option<Arc<BasisRuntime>> {
        self.runtimes.get(bkey).map(|entry| entry.clone())
    }

    pub fn insert(&self, bkey: String, runtime: BasisRuntime) {
        self.runtimes.insert(bkey, Arc::new(runtime));
    }

    pub fn remove(&self, bkey: &str) -> Option<Arc<BasisRuntime>> {
        self.runtimes.remove(bkey).map(|(_, runtime)| runtime)
    }

    pub fn keys(&self) -> Vec<String> {
        self.runtimes.iter().map(|e| e.key().clone()).collect()
    }

    /// Saves every live basis concurrently, each respecting its own
    /// in‑flight guard. Invoked by the Cron on every tick and by the
    /// dispatcher's `save()` operation.
    ///
    /// Each basis's save is submitted to *that basis's own writer executor*
    /// rather than run inline here: `bsave` is a writer(bkey) op (§4.3), and
    /// running it off the management executor's task instead would let it
    /// race with a concurrently-submitted `vadd`/`vdel`/etc. on the same
    /// kernel, which the single-writer discipline exists to rule out.
    pub async fn save_all(&self, savepath: &Path, metrics: &Arc<Metrics>) {
        let runtimes: Vec<(String, Arc<BasisRuntime>)> = self
            .runtimes
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let saves = runtimes.into_iter().map(|(bkey, runtime)| {
            let savepath = savepath.to_path_buf();
            let metrics = metrics.clone();
            async move {
                let job_runtime = runtime.clone();
                runtime
                    .writer
                    .run(move || async move {
                        job_runtime.save_if_idle(&savepath, &bkey, &metrics).await;
                    })
                    .await;
            }
        });
        futures::future::join_all(saves).await;
    }
}

/// Scans `savepath` for `*.dmp` files, returning the `bkey` (file stem) for
/// each. Used by startup `load()`; an empty or missing directory yields an
/// empty list without erroring (§8 property 4).
pub fn discover_dump_bases(savepath: &Path) -> EngineResult<Vec<String>> {
    let read_dir = match std::fs::read_dir(savepath) {
        Ok(read_dir) => read_dir,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => {
            return Err(EngineError::Internal(format!(
                "failed to scan dump directory {}: {error}",
                savepath.display()
            )))
        },
    };
    let mut bases = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|error| {
            EngineError::Internal(format!("failed to read dump directory entry: {error}"))
        })?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("dmp") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                bases.push(stem.to_string());
            }
        }
    }
    bases.sort();
    Ok(bases)
}

/// Cascading delete of a `VectorSet`: drops every recommendation touching it
/// in either direction, asks the kernel to drop the vector set itself, then
/// removes the catalog entry. All within one basis, so it is safe to run
/// entirely on that basis's writer executor.
pub async fn delete_vector_set(
    catalog: &KeyCatalog,
    kernel: &dyn SimBasisKernel,
    metrics: &Metrics,
    vkey: &str,
) -> EngineResult<()> {
    let Some(removed) = catalog.remove_vector_set(vkey) else {
        return Err(EngineError::UnknownEntry(vkey.to_string()));
    };
    for target in &removed.targets {
        let key = rkey(vkey, target);
        delete_recommendation_entry(catalog, kernel, &key).await?;
    }
    for source in &removed.sources {
        if source == vkey {
            continue;
        }
        let key = rkey(source, vkey);
        delete_recommendation_entry(catalog, kernel, &key).await?;
    }
    kernel.vdel(vkey).await?;
    metrics.record_cascaded_delete();
    Ok(())
}

/// Cascading delete of a `Recommendation`: drop the kernel's relation and
/// the catalog entry.
pub async fn delete_recommendation(
    catalog: &KeyCatalog,
    kernel: &dyn SimBasisKernel,
    metrics: &Metrics,
    key: &str,
) -> EngineResult<()> {
    if catalog.kind_of(key).is_none() {
        return Err(EngineError::UnknownEntry(key.to_string()));
    }
    delete_recommendation_entry(catalog, kernel, key).await?;
    metrics.record_cascaded_delete();
    Ok(())
}

async fn delete_recommendation_entry(
    catalog: &KeyCatalog,
    kernel: &dyn SimBasisKernel,
    key: &str,
) -> EngineResult<()> {
    if catalog.remove_recommendation(key).is_some() {
        kernel.rdel(key).await?;
    }
    Ok(())
}

/// Cascading delete of a whole `Basis`: deletes every vector set under it
/// (which in turn cascades its recommendations), then drops the Basis's own
/// catalog entry. Tearing down the basis's writer executor itself is the
/// caller's job, done *after* this returns, since a worker cannot join its
/// own thread; see `BasisRuntime::shutdown`, invoked from the management
/// executor.
pub async fn delete_basis_contents(
    catalog: &KeyCatalog,
    kernel: &dyn SimBasisKernel,
    metrics: &Metrics,
    bkey: &str,
) -> EngineResult<()> {
    let vector_sets = catalog.list_vector_sets(bkey).unwrap_or_default();
    for vkey in vector_sets {
        delete_vector_set(catalog, kernel, metrics, &vkey).await?;
    }
    catalog.remove_basis(bkey);
    metrics.record_cascaded_delete();
    Ok(())
}

pub fn default_dump_path(savepath: &Path, bkey: &str) -> PathBuf {
    dump_path(savepath, bkey)
}

#[cfg(test)]
mod tests {
    use super::*;
    use simcore_testkit::MockKernel;
    use simcore_notifications::new_kernel_event_channel;

    #[tokio::test]
    async fn cascading_vector_set_delete_removes_both_recommendation_directions() {
        let catalog = KeyCatalog::new();
        catalog.insert_basis("b1", vec!["x".into()]);
        catalog.insert_vector_set("b1", "src");
        catalog.insert_vector_set("b1", "mid");
        catalog.insert_vector_set("b1", "tgt");
        catalog.insert_recommendation("src", "mid", "b1", "cosine");
        catalog.insert_recommendation("mid", "tgt", "b1", "cosine");

        let (notifier, _listener) = new_kernel_event_channel();
        let kernel = MockKernel::new(vec!["x".into()], notifier);

        delete_vector_set(&catalog, &kernel, &Metrics::new(), "mid")
            .await
            .unwrap();

        assert!(!catalog.contains("mid"));
        assert!(!catalog.contains("src_mid"));
        assert!(!catalog.contains("mid_tgt"));
        assert!(catalog.targets_of("src").unwrap().is_empty());
    }

    #[tokio::test]
    async fn cascading_basis_delete_empties_the_catalog() {
        let catalog = KeyCatalog::new();
        catalog.insert_basis("b1", vec!["x".into()]);
        catalog.insert_vector_set("b1", "src");
        catalog.insert_vector_set("b1", "tgt");
        catalog.insert_recommendation("src", "tgt", "b1", "cosine");

        let (notifier, _listener) = new_kernel_event_channel();
        let kernel = MockKernel::new(vec!["x".into()], notifier);

        delete_basis_contents(&catalog, &kernel, &Metrics::new(), "b1")
            .await
            .unwrap();

        assert!(!catalog.contains("b1"));
        assert!(!catalog.contains("src"));
        assert!(!catalog.contains("tgt"));
        assert!(!catalog.contains("src_tgt"));
    }

    #[test]
    fn discover_dump_bases_on_missing_directory_is_empty() {
        let bases = discover_dump_bases(Path::new("/nonexistent/simcore-test-path")).unwrap();
        assert!(bases.is_empty());
    }
}
