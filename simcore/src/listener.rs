// Copyright (c) Simcore Contributors
// SPDX-License-Identifier: Apache-2.0

//! The Listener Bridge (§4.4): applies kernel-announced changes to the
//! catalog without re-issuing kernel calls. A kernel uses this to report
//! entities it materialized on its own, most importantly vector sets and
//! recommendations reconstructed while restoring a dump during `bload` or
//! startup `load()`, which the dispatcher has no other way of learning about
//! since the dump's internal layout is the kernel's business, not ours.

use std::sync::Arc;

use simcore_notifications::{KernelEvent, KernelEventListener};
use tokio::runtime::Handle as RuntimeHandle;
use tokio::task::JoinHandle;

use crate::catalog::{rkey, KeyCatalog};
use crate::metrics::Metrics;

/// Drains one basis's `KernelEventListener` for the lifetime of that basis.
///
/// `shutdown` takes `&self`, matching `WriterExecutor`: both typically live
/// behind an `Arc<BasisRuntime>` shared with in-flight work.
pub struct ListenerBridge {
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ListenerBridge {
    /// Spawns the drain loop onto `writer`, the dedicated runtime of the
    /// basis this listener belongs to (§4.1: "listener‑driven updates happen
    /// on the writer executor of the relevant basis"). A bare `tokio::spawn`
    /// would bind to whatever runtime happens to be entered at the call
    /// site — the management executor's, if called from inside a `bmk`/
    /// `bload` job — which is not that basis's writer at all. Spawning
    /// through the writer's own `Handle` instead pins this task to the
    /// correct runtime regardless of where `spawn` is called from.
    pub fn spawn(
        catalog: Arc<KeyCatalog>,
        metrics: Arc<Metrics>,
        mut listener: KernelEventListener,
        writer: RuntimeHandle,
    ) -> Self {
        let handle = writer.spawn(async move {
            while let Some(event) = listener.next_event().await {
                apply_event(&catalog, &metrics, event);
            }
        });
        Self {
            handle: parking_lot::Mutex::new(Some(handle)),
        }
    }

    /// Stops draining and waits for the background task to finish. Called
    /// when the basis it watches is torn down.
    pub async fn shutdown(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }
}

fn apply_event(catalog: &KeyCatalog, metrics: &Metrics, event: KernelEvent) {
    match event {
        KernelEvent::VecSetAdded { bkey, vkey } => {
            if !catalog.contains(&vkey) {
                catalog.insert_vector_set(&bkey, &vkey);
                tracing::debug!(basis = %bkey, vector_set = %vkey, "listener applied VecSetAdded");
            }
        },
        KernelEvent::VecSetDeleted { bkey, vkey } => {
            if catalog.remove_vector_set(&vkey).is_some() {
                metrics.record_cascaded_delete();
                tracing::debug!(basis = %bkey, vector_set = %vkey, "listener applied VecSetDeleted");
            }
        },
        KernelEvent::RecAdded { bkey, from, to } => {
            // The kernel does not carry a human-readable scoring function
            // name across a dump; an empty funcscore here just means "ask
            // the kernel" the next time this recommendation is read.
            catalog.insert_recommendation(&from, &to, &bkey, "");
            tracing::debug!(basis = %bkey, %from, %to, "listener applied RecAdded");
        },
        KernelEvent::RecDeleted { bkey, from, to } => {
            let key = rkey(&from, &to);
            if catalog.remove_recommendation(&key).is_some() {
                tracing::debug!(basis = %bkey, %from, %to, "listener applied RecDeleted");
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simcore_notifications::new_kernel_event_channel;
    use std::time::Duration;

    #[tokio::test]
    async fn applies_vector_set_and_recommendation_events_in_order() {
        let catalog = Arc::new(KeyCatalog::new());
        catalog.insert_basis("b1", vec!["x".into()]);
        let metrics = Arc::new(Metrics::new());
        let (notifier, listener) = new_kernel_event_channel();
        let bridge = ListenerBridge::spawn(
            catalog.clone(),
            metrics.clone(),
            listener,
            tokio::runtime::Handle::current(),
        );

        notifier
            .notify(KernelEvent::VecSetAdded {
                bkey: "b1".into(),
                vkey: "src".into(),
            })
            .unwrap();
        notifier
            .notify(KernelEvent::VecSetAdded {
                bkey: "b1".into(),
                vkey: "tgt".into(),
            })
            .unwrap();
        notifier
            .notify(KernelEvent::RecAdded {
                bkey: "b1".into(),
                from: "src".into(),
                to: "tgt".into(),
            })
            .unwrap();

        // Give the background task a chance to drain the channel.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(catalog.contains("src"));
        assert!(catalog.contains("tgt"));
        assert_eq!(catalog.targets_of("src").unwrap(), vec!["tgt".to_string()]);

        notifier
            .notify(KernelEvent::RecDeleted {
                bkey: "b1".into(),
                from: "src".into(),
                to: "tgt".into(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(catalog.targets_of("src").unwrap().is_empty());

        bridge.shutdown().await;
    }
}
