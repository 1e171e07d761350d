// Copyright (c) Simcore Contributors
// SPDX-License-Identifier: Apache-2.0

//! The Dispatcher (§4.3): the engine's public operation surface. Every
//! method here validates synchronously against the catalog, then routes the
//! actual work to the management executor, the owning basis's writer
//! executor, or the bounded reader pool, per the table in §4.3.

use std::future::Future;
use std::sync::Arc;

use simcore_config::EngineConfig;
use simcore_kernel_iface::{BasisConfig, ListenerScope, SimBasisFactory, SparsePairs};
use simcore_notifications::new_kernel_event_channel;
use tokio::sync::oneshot;

use crate::catalog::{rkey, Kind, KeyCatalog};
use crate::cron::SnapshotCron;
use crate::error::{EngineError, EngineResult};
use crate::executor::{ReaderPool, WriterExecutor};
use crate::lifecycle::{self, BasisRegistry, BasisRuntime};
use crate::listener::ListenerBridge;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::validator;

/// The whole of the in-memory similarity engine: catalog, executors, reader
/// pool, and the kernel factory used to bring basis runtimes into being.
pub struct Engine {
    catalog: Arc<KeyCatalog>,
    metrics: Arc<Metrics>,
    bases: Arc<BasisRegistry>,
    mgmt: WriterExecutor,
    readers: ReaderPool,
    factory: Arc<dyn SimBasisFactory>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig, factory: Arc<dyn SimBasisFactory>) -> Arc<Self> {
        let metrics = Arc::new(Metrics::new());
        let readers = ReaderPool::new(config.reader, metrics.clone());
        Arc::new(Self {
            catalog: Arc::new(KeyCatalog::new()),
            metrics,
            bases: Arc::new(BasisRegistry::new()),
            mgmt: WriterExecutor::spawn("simcore-mgmt"),
            readers,
            factory,
            config,
        })
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn catalog(&self) -> &KeyCatalog {
        &self.catalog
    }

    /// Starts the periodic snapshot timer (§4.5). Returns the handle the
    /// caller must eventually `shutdown()`.
    pub fn start_cron(self: &Arc<Self>) -> SnapshotCron {
        let engine = self.clone();
        SnapshotCron::spawn(self.config.saveinterval(), self.metrics.clone(), move || {
            let engine = engine.clone();
            Box::pin(async move {
                if let Err(error) = engine.save().await {
                    tracing::warn!(%error, "periodic save failed");
                }
            })
        })
    }

    // ---- lifecycle-level operations (mgmt) ----

    /// Startup `load()`: scans the dump directory and `bload`s every basis
    /// found. An empty or missing directory is not an error (§8 property 4).
    #[tracing::instrument(skip(self))]
    pub async fn load(&self) -> EngineResult<()> {
        let savepath = self.config.savepath.clone();
        let bases = tokio::task::spawn_blocking(move || lifecycle::discover_dump_bases(&savepath))
            .await
            .map_err(|join_error| {
                EngineError::Internal(format!("dump directory scan task failed: {join_error}"))
            })??;
        for bkey in bases {
            self.bload(&bkey).await?;
        }
        Ok(())
    }

    /// `save()`: snapshots every live basis, skipping any still mid-save.
    /// Runs on the management executor per §4.3's table, even though the
    /// actual per-basis snapshot work is handed off again from there to each
    /// basis's own writer.
    #[tracing::instrument(skip(self))]
    pub async fn save(&self) -> EngineResult<()> {
        let bases = self.bases.clone();
        let savepath = self.config.savepath.clone();
        let metrics = self.metrics.clone();
        self.run_on_mgmt(move || async move {
            bases.save_all(&savepath, &metrics).await;
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub fn blist(&self) -> Vec<String> {
        self.mark_dispatched();
        self.catalog.list_bases()
    }

    #[tracing::instrument(skip(self, base))]
    pub async fn bmk(&self, bkey: &str, base: Vec<String>) -> EngineResult<()> {
        validator::valid_key_format(bkey)?;
        validator::not_exists(&self.catalog, bkey)?;
        let config = BasisConfig {
            values: self.config.basis_config(bkey),
        };
        let catalog = self.catalog.clone();
        let bases = self.bases.clone();
        let factory = self.factory.clone();
        let metrics = self.metrics.clone();
        let bkey_owned = bkey.to_string();
        self.run_on_mgmt(move || async move {
            let (notifier, listener) = new_kernel_event_channel();
            let kernel = factory
                .create(&bkey_owned, base.clone(), config, notifier)
                .await?;
            catalog.insert_basis(&bkey_owned, base);
            let writer = WriterExecutor::spawn(format!("simcore-writer-{bkey_owned}"));
            let bridge = ListenerBridge::spawn(catalog.clone(), metrics.clone(), listener, writer.handle());
            bases.insert(bkey_owned.clone(), BasisRuntime::new(kernel, writer, bridge));
            Ok(())
        })
        .await
    }

    /// Loads a basis from its dump file. If `bkey` already exists it is
    /// cascade-deleted first, fully completing before the reload begins, so
    /// no half-built state is ever exposed (§9's concern about `bload`
    /// racing its own re-creation).
    #[tracing::instrument(skip(self))]
    pub async fn bload(&self, bkey: &str) -> EngineResult<()> {
        validator::valid_key_format(bkey)?;
        if self.catalog.contains(bkey) {
            self.del(bkey).await?;
        }
        let path = lifecycle::default_dump_path(&self.config.savepath, bkey);
        validator::valid_dump_path(&path)?;
        let config = BasisConfig {
            values: self.config.basis_config(bkey),
        };
        let catalog = self.catalog.clone();
        let bases = self.bases.clone();
        let factory = self.factory.clone();
        let metrics = self.metrics.clone();
        let bkey_owned = bkey.to_string();
        self.run_on_mgmt(move || async move {
            let (notifier, listener) = new_kernel_event_channel();
            let (kernel, coords) = factory.load(&bkey_owned, &path, config, notifier).await?;
            catalog.insert_basis(&bkey_owned, coords);
            let writer = WriterExecutor::spawn(format!("simcore-writer-{bkey_owned}"));
            let bridge = ListenerBridge::spawn(catalog.clone(), metrics.clone(), listener, writer.handle());
            bases.insert(bkey_owned.clone(), BasisRuntime::new(kernel, writer, bridge));
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn bsave(&self, bkey: &str) -> EngineResult<()> {
        validator::kind_is(&self.catalog, bkey, Kind::Basis)?;
        let runtime = self.basis_runtime(bkey)?;
        let savepath = self.config.savepath.clone();
        let metrics = self.metrics.clone();
        let bkey_owned = bkey.to_string();
        self.run_on_writer(&runtime.writer, move || async move {
            runtime.save_if_idle(&savepath, &bkey_owned, &metrics).await;
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self, base))]
    pub async fn brev(&self, bkey: &str, base: Vec<String>) -> EngineResult<()> {
        validator::kind_is(&self.catalog, bkey, Kind::Basis)?;
        for label in &base {
            validator::valid_key_format(label)?;
        }
        let runtime = self.basis_runtime(bkey)?;
        let catalog = self.catalog.clone();
        let bkey_owned = bkey.to_string();
        self.run_on_writer(&runtime.writer, move || async move {
            runtime.kernel.brev(base.clone()).await?;
            catalog.set_basis_coords(&bkey_owned, base);
            Ok(())
        })
        .await
    }

    /// Served from the catalog's cached coordinate copy rather than a kernel
    /// round-trip (§3.1): the dispatcher already knows this value from the
    /// last successful `bmk`/`brev`/`bload`. Still routed through the reader
    /// pool like the other read ops (§5 lists `bget` among them), so it is
    /// subject to the same capacity bound and can be rejected under load
    /// rather than always succeeding for free.
    #[tracing::instrument(skip(self))]
    pub async fn bget(&self, bkey: &str) -> EngineResult<Vec<String>> {
        validator::kind_is(&self.catalog, bkey, Kind::Basis)?;
        let catalog = self.catalog.clone();
        let bkey_owned = bkey.to_string();
        self.mark_dispatched();
        self.readers
            .submit(move || async move {
                catalog
                    .coords_of(&bkey_owned)
                    .ok_or_else(|| EngineError::UnknownEntry(bkey_owned.clone()))
            })
            .await?
    }

    // ---- vector set operations ----

    #[tracing::instrument(skip(self))]
    pub fn vlist(&self, bkey: &str) -> EngineResult<Vec<String>> {
        validator::kind_is(&self.catalog, bkey, Kind::Basis)?;
        self.mark_dispatched();
        Ok(self.catalog.list_vector_sets(bkey).unwrap_or_default())
    }

    #[tracing::instrument(skip(self))]
    pub async fn vmk(&self, bkey: &str, vkey: &str) -> EngineResult<()> {
        validator::kind_is(&self.catalog, bkey, Kind::Basis)?;
        validator::valid_key_format(vkey)?;
        validator::not_exists(&self.catalog, vkey)?;
        let runtime = self.basis_runtime(bkey)?;
        let catalog = self.catalog.clone();
        let bkey_owned = bkey.to_string();
        let vkey_owned = vkey.to_string();
        self.run_on_mgmt(move || async move {
            runtime.kernel.vmk(&vkey_owned).await?;
            catalog.insert_vector_set(&bkey_owned, &vkey_owned);
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn vids(&self, vkey: &str) -> EngineResult<Vec<i64>> {
        validator::kind_is(&self.catalog, vkey, Kind::VectorSet)?;
        let runtime = self.basis_runtime_of(vkey)?;
        let vkey_owned = vkey.to_string();
        self.mark_dispatched();
        self.readers
            .submit(move || async move { runtime.kernel.vids(&vkey_owned).await })
            .await?
            .map_err(EngineError::from)
    }

    #[tracing::instrument(skip(self))]
    pub async fn vget(&self, vkey: &str, id: i64) -> EngineResult<Vec<f32>> {
        validator::kind_is(&self.catalog, vkey, Kind::VectorSet)?;
        let runtime = self.basis_runtime_of(vkey)?;
        let vkey_owned = vkey.to_string();
        self.mark_dispatched();
        self.readers
            .submit(move || async move { runtime.kernel.vget(&vkey_owned, id).await })
            .await?
            .map_err(EngineError::from)
    }

    /// Fire-and-forget: validates, enqueues, and returns as soon as the
    /// writer has accepted the job, without waiting for it to run (§4.3,
    /// §7). Failures inside the writer are logged, not propagated here.
    pub fn vadd(&self, vkey: &str, id: i64, values: Vec<f32>) -> EngineResult<()> {
        self.dense_write(vkey, id, values, DenseOp::Add)
    }

    pub fn vset(&self, vkey: &str, id: i64, values: Vec<f32>) -> EngineResult<()> {
        self.dense_write(vkey, id, values, DenseOp::Set)
    }

    pub fn vacc(&self, vkey: &str, id: i64, values: Vec<f32>) -> EngineResult<()> {
        self.dense_write(vkey, id, values, DenseOp::Acc)
    }

    #[tracing::instrument(skip(self, values))]
    fn dense_write(&self, vkey: &str, id: i64, values: Vec<f32>, op: DenseOp) -> EngineResult<()> {
        validator::kind_is(&self.catalog, vkey, Kind::VectorSet)?;
        validator::valid_id(id)?;
        validator::valid_probs(&values)?;
        let runtime = self.basis_runtime_of(vkey)?;
        let catalog = self.catalog.clone();
        let vkey_owned = vkey.to_string();
        let bycount = self.config.bycount;
        self.mark_dispatched();
        runtime.writer.submit(move || async move {
            let result = match op {
                DenseOp::Add => runtime.kernel.vadd(&vkey_owned, id, values).await,
                DenseOp::Set => runtime.kernel.vset(&vkey_owned, id, values).await,
                DenseOp::Acc => runtime.kernel.vacc(&vkey_owned, id, values).await,
            };
            if let Err(error) = result {
                tracing::warn!(vkey = %vkey_owned, id, %error, "dense vector write failed");
                return;
            }
            if let Some(count) = catalog.bump_write_count(&vkey_owned) {
                if bycount > 0 && count % bycount == 0 {
                    tracing::info!(vkey = %vkey_owned, count, "bulk write progress");
                }
            }
        });
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn vrem(&self, vkey: &str, id: i64) -> EngineResult<()> {
        validator::kind_is(&self.catalog, vkey, Kind::VectorSet)?;
        let runtime = self.basis_runtime_of(vkey)?;
        let vkey_owned = vkey.to_string();
        self.mark_dispatched();
        runtime.writer.submit(move || async move {
            if let Err(error) = runtime.kernel.vrem(&vkey_owned, id).await {
                tracing::warn!(vkey = %vkey_owned, id, %error, "vector removal failed");
            }
        });
        Ok(())
    }

    // ---- sparse vector operations ----

    #[tracing::instrument(skip(self))]
    pub async fn iget(&self, vkey: &str, id: i64) -> EngineResult<SparsePairs> {
        validator::exists(&self.catalog, vkey)?;
        let runtime = self.basis_runtime_of(vkey)?;
        let vkey_owned = vkey.to_string();
        self.mark_dispatched();
        self.readers
            .submit(move || async move { runtime.kernel.iget(&vkey_owned, id).await })
            .await?
            .map_err(EngineError::from)
    }

    pub fn iadd(&self, vkey: &str, id: i64, pairs: Vec<i64>) -> EngineResult<()> {
        self.sparse_write(vkey, id, pairs, SparseOp::Add)
    }

    pub fn iset(&self, vkey: &str, id: i64, pairs: Vec<i64>) -> EngineResult<()> {
        self.sparse_write(vkey, id, pairs, SparseOp::Set)
    }

    pub fn iacc(&self, vkey: &str, id: i64, pairs: Vec<i64>) -> EngineResult<()> {
        self.sparse_write(vkey, id, pairs, SparseOp::Acc)
    }

    #[tracing::instrument(skip(self, pairs))]
    fn sparse_write(
        &self,
        vkey: &str,
        id: i64,
        pairs: Vec<i64>,
        op: SparseOp,
    ) -> EngineResult<()> {
        validator::kind_is(&self.catalog, vkey, Kind::VectorSet)?;
        validator::valid_id(id)?;
        let bkey = self
            .catalog
            .basis_of(vkey)
            .ok_or_else(|| EngineError::UnknownEntry(vkey.to_string()))?;
        let dim = self.catalog.coords_of(&bkey).map(|c| c.len()).unwrap_or(0);
        let max_index = dim.saturating_sub(1) as u32;
        validator::valid_sparse_pairs(max_index, &pairs)?;
        let converted: SparsePairs = pairs
            .chunks(2)
            .map(|chunk| (chunk[0] as u32, chunk[1] as u32))
            .collect();
        let runtime = self.basis_runtime_of(vkey)?;
        let catalog = self.catalog.clone();
        let vkey_owned = vkey.to_string();
        let bycount = self.config.bycount;
        self.mark_dispatched();
        runtime.writer.submit(move || async move {
            let result = match op {
                SparseOp::Add => runtime.kernel.iadd(&vkey_owned, id, converted).await,
                SparseOp::Set => runtime.kernel.iset(&vkey_owned, id, converted).await,
                SparseOp::Acc => runtime.kernel.iacc(&vkey_owned, id, converted).await,
            };
            if let Err(error) = result {
                tracing::warn!(vkey = %vkey_owned, id, %error, "sparse vector write failed");
                return;
            }
            if let Some(count) = catalog.bump_write_count(&vkey_owned) {
                if bycount > 0 && count % bycount == 0 {
                    tracing::info!(vkey = %vkey_owned, count, "bulk write progress");
                }
            }
        });
        Ok(())
    }

    // ---- recommendation operations ----

    #[tracing::instrument(skip(self))]
    pub fn rlist(&self, vkey: &str) -> EngineResult<Vec<String>> {
        validator::kind_is(&self.catalog, vkey, Kind::VectorSet)?;
        self.mark_dispatched();
        Ok(self.catalog.targets_of(vkey).unwrap_or_default())
    }

    #[tracing::instrument(skip(self))]
    pub async fn rmk(&self, src: &str, tgt: &str, funcscore: &str) -> EngineResult<()> {
        validator::kind_is(&self.catalog, src, Kind::VectorSet)?;
        validator::kind_is(&self.catalog, tgt, Kind::VectorSet)?;
        validator::same_basis(&self.catalog, src, tgt)?;
        let key = rkey(src, tgt);
        validator::not_exists(&self.catalog, &key)?;
        let runtime = self.basis_runtime_of(src)?;
        let catalog = self.catalog.clone();
        let basis = self
            .catalog
            .basis_of(src)
            .ok_or_else(|| EngineError::UnknownEntry(src.to_string()))?;
        let (src_owned, tgt_owned, funcscore_owned) =
            (src.to_string(), tgt.to_string(), funcscore.to_string());
        self.run_on_mgmt(move || async move {
            runtime.kernel.rmk(&src_owned, &tgt_owned, &funcscore_owned).await?;
            catalog.insert_recommendation(&src_owned, &tgt_owned, &basis, &funcscore_owned);
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn rget(&self, src: &str, id: i64, tgt: &str) -> EngineResult<Vec<String>> {
        validator::kind_is(&self.catalog, src, Kind::VectorSet)?;
        validator::kind_is(&self.catalog, tgt, Kind::VectorSet)?;
        validator::exists(&self.catalog, &rkey(src, tgt))?;
        let runtime = self.basis_runtime_of(src)?;
        let (src_owned, tgt_owned) = (src.to_string(), tgt.to_string());
        self.mark_dispatched();
        self.readers
            .submit(move || async move { runtime.kernel.rget(&src_owned, id, &tgt_owned).await })
            .await?
            .map_err(EngineError::from)
    }

    #[tracing::instrument(skip(self))]
    pub async fn rrec(&self, src: &str, id: i64, tgt: &str) -> EngineResult<Vec<i64>> {
        validator::kind_is(&self.catalog, src, Kind::VectorSet)?;
        validator::kind_is(&self.catalog, tgt, Kind::VectorSet)?;
        validator::exists(&self.catalog, &rkey(src, tgt))?;
        let runtime = self.basis_runtime_of(src)?;
        let (src_owned, tgt_owned) = (src.to_string(), tgt.to_string());
        self.mark_dispatched();
        self.readers
            .submit(move || async move { runtime.kernel.rrec(&src_owned, id, &tgt_owned).await })
            .await?
            .map_err(EngineError::from)
    }

    // ---- deletion & listener registration ----

    /// Cascading `del(key)` (§4.3): dispatches to the cascade rule matching
    /// `key`'s kind, running on the writer owning `key`'s basis. Deleting a
    /// whole Basis additionally tears down its writer executor and listener
    /// bridge afterward, from the management executor (a worker cannot join
    /// its own thread).
    #[tracing::instrument(skip(self))]
    pub async fn del(&self, key: &str) -> EngineResult<()> {
        let kind = self
            .catalog
            .kind_of(key)
            .ok_or_else(|| EngineError::UnknownEntry(key.to_string()))?;
        match kind {
            Kind::Basis => self.del_basis(key).await,
            Kind::VectorSet => self.del_vector_set(key).await,
            Kind::Recommendation => self.del_recommendation(key).await,
        }
    }

    async fn del_basis(&self, bkey: &str) -> EngineResult<()> {
        let runtime = self.basis_runtime(bkey)?;
        let catalog = self.catalog.clone();
        let metrics = self.metrics.clone();
        let bkey_owned = bkey.to_string();
        self.run_on_writer(&runtime.writer, move || async move {
            lifecycle::delete_basis_contents(&catalog, runtime.kernel.as_ref(), &metrics, &bkey_owned)
                .await
        })
        .await?;
        if let Some(runtime) = self.bases.remove(bkey) {
            runtime.shutdown().await;
        }
        Ok(())
    }

    async fn del_vector_set(&self, vkey: &str) -> EngineResult<()> {
        let runtime = self.basis_runtime_of(vkey)?;
        let catalog = self.catalog.clone();
        let metrics = self.metrics.clone();
        let vkey_owned = vkey.to_string();
        self.run_on_writer(&runtime.writer, move || async move {
            lifecycle::delete_vector_set(&catalog, runtime.kernel.as_ref(), &metrics, &vkey_owned).await
        })
        .await
    }

    async fn del_recommendation(&self, key: &str) -> EngineResult<()> {
        let basis = self
            .catalog
            .basis_of(key)
            .ok_or_else(|| EngineError::UnknownEntry(key.to_string()))?;
        let runtime = self.basis_runtime(&basis)?;
        let catalog = self.catalog.clone();
        let metrics = self.metrics.clone();
        let key_owned = key.to_string();
        self.run_on_writer(&runtime.writer, move || async move {
            lifecycle::delete_recommendation(&catalog, runtime.kernel.as_ref(), &metrics, &key_owned).await
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn listen(&self, bkey: &str, scope: ListenerScope) -> EngineResult<()> {
        let runtime = self.basis_runtime(bkey)?;
        self.run_on_writer(&runtime.writer, move || async move {
            runtime.kernel.add_listener(scope).await.map_err(EngineError::from)
        })
        .await
    }

    // ---- internal plumbing ----

    fn basis_runtime(&self, bkey: &str) -> EngineResult<Arc<BasisRuntime>> {
        self.bases
            .get(bkey)
            .ok_or_else(|| EngineError::UnknownEntry(bkey.to_string()))
    }

    fn basis_runtime_of(&self, key: &str) -> EngineResult<Arc<BasisRuntime>> {
        let bkey = self
            .catalog
            .basis_of(key)
            .ok_or_else(|| EngineError::UnknownEntry(key.to_string()))?;
        self.basis_runtime(&bkey)
    }

    async fn run_on_mgmt<F, Fut, T>(&self, job: F) -> EngineResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = EngineResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.mark_dispatched();
        Self::run_on(&self.mgmt, job).await
    }

    async fn run_on_writer<F, Fut, T>(&self, writer: &WriterExecutor, job: F) -> EngineResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = EngineResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.mark_dispatched();
        Self::run_on(writer, job).await
    }

    async fn run_on<F, Fut, T>(executor: &WriterExecutor, job: F) -> EngineResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = EngineResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        executor.submit(move || async move {
            let _ = tx.send(job().await);
        });
        rx.await
            .map_err(|_| EngineError::Internal("executor dropped without replying".to_string()))?
    }

    /// Records that one op was accepted past validation and handed to an
    /// executor or the reader pool, for the `ops_dispatched` counter.
    fn mark_dispatched(&self) {
        self.metrics.record_dispatched();
    }
}

#[derive(Clone, Copy)]
enum DenseOp {
    Add,
    Set,
    Acc,
}

#[derive(Clone, Copy)]
enum SparseOp {
    Add,
    Set,
    Acc,
}
