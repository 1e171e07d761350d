// Copyright (c) Simcore Contributors
// SPDX-License-Identifier: Apache-2.0

//! The contract a numerical similarity kernel (a `SimBasis` implementation)
//! must satisfy to be driven by the dispatch layer in `simcore`.
//!
//! Everything in this crate describes an external collaborator: vector
//! storage, similarity scoring and neighbor-list maintenance are someone
//! else's problem. `simcore` only needs to know how to ask for the work and
//! how to tell when it failed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use simcore_notifications::KernelEventNotifier;
use thiserror::Error;

/// Opaque per-basis configuration forwarded to the kernel unexamined
/// (`basis.<bkey>.*` in the engine configuration).
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct BasisConfig {
    #[serde(flatten)]
    pub values: std::collections::BTreeMap<String, serde_yaml::Value>,
}

/// A sparse probability vector as alternating `(index, weight)` pairs, already
/// validated (even length, indices within the basis dimension, non-negative
/// weights) by the time it reaches the kernel.
pub type SparsePairs = Vec<(u32, u32)>;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("kernel I/O error: {0}")]
    Io(String),
    #[error("kernel rejected the operation: {0}")]
    Rejected(String),
    #[error("kernel panicked while processing the request: {0}")]
    Panicked(String),
    #[error("kernel reported an unexpected condition: {0}")]
    Other(String),
}

/// Per-basis numerical kernel. One instance exists per live `Basis` key and
/// is owned exclusively by that basis's writer executor (see `simcore`); the
/// kernel itself may serve reads concurrently with its own writer, but that
/// is the kernel's concern, not the dispatcher's.
#[async_trait]
pub trait SimBasisKernel: Send + Sync + 'static {
    /// Persist the basis to `path` (one `<bkey>.dmp` file).
    async fn bsave(&self, path: &Path) -> Result<(), KernelError>;

    /// Reorder or rename the basis's coordinate labels.
    async fn brev(&self, base: Vec<String>) -> Result<(), KernelError>;

    /// Return the current ordered coordinate labels.
    async fn bget(&self) -> Result<Vec<String>, KernelError>;

    async fn vmk(&self, vkey: &str) -> Result<(), KernelError>;
    async fn vdel(&self, vkey: &str) -> Result<(), KernelError>;
    async fn vids(&self, vkey: &str) -> Result<Vec<i64>, KernelError>;
    async fn vget(&self, vkey: &str, id: i64) -> Result<Vec<f32>, KernelError>;
    async fn vadd(&self, vkey: &str, id: i64, values: Vec<f32>) -> Result<(), KernelError>;
    async fn vset(&self, vkey: &str, id: i64, values: Vec<f32>) -> Result<(), KernelError>;
    async fn vacc(&self, vkey: &str, id: i64, values: Vec<f32>) -> Result<(), KernelError>;
    async fn vrem(&self, vkey: &str, id: i64) -> Result<(), KernelError>;

    async fn iget(&self, vkey: &str, id: i64) -> Result<SparsePairs, KernelError>;
    async fn iadd(&self, vkey: &str, id: i64, pairs: SparsePairs) -> Result<(), KernelError>;
    async fn iset(&self, vkey: &str, id: i64, pairs: SparsePairs) -> Result<(), KernelError>;
    async fn iacc(&self, vkey: &str, id: i64, pairs: SparsePairs) -> Result<(), KernelError>;

    async fn rmk(&self, src: &str, tgt: &str, funcscore: &str) -> Result<(), KernelError>;
    async fn rdel(&self, rkey: &str) -> Result<(), KernelError>;
    /// Top-K recommended ids for `tgt` given `id` in `src`, rendered as
    /// `"id:score"` strings (the kernel owns the score format).
    async fn rget(&self, src: &str, id: i64, tgt: &str) -> Result<Vec<String>, KernelError>;
    /// Same as `rget` but ids only.
    async fn rrec(&self, src: &str, id: i64, tgt: &str) -> Result<Vec<i64>, KernelError>;

    /// Registers interest in fine-grained change notifications scoped to
    /// `scope`. The channel events actually arrive on is the
    /// `KernelEventNotifier` the kernel was constructed with; this just
    /// tells the kernel which keys to bother watching.
    async fn add_listener(&self, scope: ListenerScope) -> Result<(), KernelError>;
}

/// The three `listen(...)` overloads from §6: a whole basis, a single
/// vector set, or one (source, target) recommendation pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenerScope {
    Basis,
    VectorSet(String),
    Recommendation { src: String, tgt: String },
}

/// Constructs or restores the kernel instance backing a single basis.
///
/// `simcore` holds one `Arc<dyn SimBasisKernel>` per live basis; this factory
/// is how those instances come into being, whether from `bmk` (fresh) or
/// `bload`/startup `load()` (restored from a dump file).
#[async_trait]
pub trait SimBasisFactory: Send + Sync + 'static {
    async fn create(
        &self,
        bkey: &str,
        coords: Vec<String>,
        config: BasisConfig,
        events: KernelEventNotifier,
    ) -> Result<Arc<dyn SimBasisKernel>, KernelError>;

    /// Restores a basis from `<savepath>/<bkey>.dmp`, returning the kernel
    /// handle along with the coordinate names it recovered (the dispatcher
    /// has no other way to learn them without parsing the dump itself).
    /// Any vector sets or recommendations the dump contains are announced
    /// through `events` as the kernel reconstructs them, so the Listener
    /// Bridge can repopulate the catalog without the dispatcher parsing the
    /// dump itself.
    async fn load(
        &self,
        bkey: &str,
        path: &Path,
        config: BasisConfig,
        events: KernelEventNotifier,
    ) -> Result<(Arc<dyn SimBasisKernel>, Vec<String>), KernelError>;
}

/// Resolves the dump file path for a basis under a save directory.
pub fn dump_path(savepath: &Path, bkey: &str) -> PathBuf {
    savepath.join(format!("{bkey}.dmp"))
}
