// Copyright (c) Simcore Contributors
// SPDX-License-Identifier: Apache-2.0

use simcore_kernel_iface::KernelError;
use thiserror::Error;

/// Every error the dispatcher can hand back to a caller (§7).
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("key {0:?} must not contain '_'")]
    InvalidKeyFormat(String),
    #[error("unknown key {0:?}")]
    UnknownEntry(String),
    #[error("key {0:?} already exists")]
    DuplicateEntry(String),
    #[error("key {key:?} has kind {actual:?}, expected {expected:?}")]
    KindMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("vector id {0} must be >= 1")]
    InvalidId(i64),
    #[error("probability {0} is out of [0, 1]")]
    InvalidProbability(f32),
    #[error("invalid sparse pair list: {0}")]
    InvalidSparsePair(String),
    #[error("{src:?} and {tgt:?} do not share a basis")]
    BasisMismatch { src: String, tgt: String },
    #[error("dump file for {0:?} does not exist")]
    DumpMissing(String),
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),
    #[error("reader pool rejected the request: queue is full")]
    Rejected,
    #[error("internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
