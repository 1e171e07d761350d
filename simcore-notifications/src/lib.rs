// Copyright (c) Simcore Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{channel::mpsc, stream::FusedStream, Stream, StreamExt};
use thiserror::Error;

/// Event channel capacity. Kernel-emitted events are rare relative to the
/// operations that cause them (one event per `vmk`/`del`/`rmk` call, not per
/// vector write), so a small bounded buffer is enough to absorb bursts
/// without ever blocking the kernel's own writer thread.
const KERNEL_EVENT_CHANNEL_SIZE: usize = 128;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("failed to deliver kernel event to the listener: {0}")]
    DeliveryFailed(String),
}

/// The four events a kernel may emit about entities it materialized or
/// removed internally (dump restore, internal bookkeeping). The Listener
/// Bridge applies each of these to the catalog exactly as the corresponding
/// dispatcher operation would, without re-issuing kernel calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KernelEvent {
    VecSetAdded { bkey: String, vkey: String },
    VecSetDeleted { bkey: String, vkey: String },
    RecAdded { bkey: String, from: String, to: String },
    RecDeleted { bkey: String, from: String, to: String },
}

/// Returns a `(KernelEventNotifier, KernelEventListener)` pair scoped to a
/// single basis. The kernel instance for that basis holds the notifier; the
/// Listener Bridge holds the listener and drains it on that basis's writer
/// executor.
pub fn new_kernel_event_channel() -> (KernelEventNotifier, KernelEventListener) {
    let (sender, receiver) = mpsc::channel(KERNEL_EVENT_CHANNEL_SIZE);
    (KernelEventNotifier { sender }, KernelEventListener { receiver })
}

/// The kernel-side handle used to announce internally materialized changes.
#[derive(Clone)]
pub struct KernelEventNotifier {
    sender: mpsc::Sender<KernelEvent>,
}

impl fmt::Debug for KernelEventNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelEventNotifier").finish()
    }
}

impl KernelEventNotifier {
    /// Announces an event. Never blocks: if the listener's queue is full the
    /// event is dropped and an error is returned for the caller to log. A
    /// kernel should treat this as best-effort; the dispatcher's own
    /// operations remain the source of truth for anything the kernel also
    /// reports through its direct return values.
    pub fn notify(&self, event: KernelEvent) -> Result<(), Error> {
        self.sender
            .clone()
            .try_send(event)
            .map_err(|error| Error::DeliveryFailed(error.to_string()))
    }
}

/// The dispatcher-side handle used to drain kernel events.
#[derive(Debug)]
pub struct KernelEventListener {
    receiver: mpsc::Receiver<KernelEvent>,
}

impl KernelEventListener {
    pub async fn next_event(&mut self) -> Option<KernelEvent> {
        self.receiver.next().await
    }
}

impl Stream for KernelEventListener {
    type Item = KernelEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

impl FusedStream for KernelEventListener {
    fn is_terminated(&self) -> bool {
        self.receiver.is_terminated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_events_in_order() {
        let (notifier, mut listener) = new_kernel_event_channel();
        notifier
            .notify(KernelEvent::VecSetAdded {
                bkey: "b1".into(),
                vkey: "vs".into(),
            })
            .unwrap();
        notifier
            .notify(KernelEvent::RecAdded {
                bkey: "b1".into(),
                from: "src".into(),
                to: "tgt".into(),
            })
            .unwrap();

        assert_eq!(
            listener.next_event().await,
            Some(KernelEvent::VecSetAdded {
                bkey: "b1".into(),
                vkey: "vs".into()
            })
        );
        assert_eq!(
            listener.next_event().await,
            Some(KernelEvent::RecAdded {
                bkey: "b1".into(),
                from: "src".into(),
                to: "tgt".into()
            })
        );
    }

    #[tokio::test]
    async fn full_channel_reports_delivery_failure() {
        let (notifier, _listener) = new_kernel_event_channel();
        for i in 0..KERNEL_EVENT_CHANNEL_SIZE {
            notifier
                .notify(KernelEvent::VecSetAdded {
                    bkey: "b".into(),
                    vkey: format!("v{i}"),
                })
                .unwrap();
        }
        let overflow = notifier.notify(KernelEvent::VecSetAdded {
            bkey: "b".into(),
            vkey: "overflow".into(),
        });
        assert!(overflow.is_err());
    }
}
