//! Feed-to-coalescer forwarding
//!
//! A [`Forwarder`] owns one feed subscription and hands each notice to a
//! coalescer, optionally keeping only one entity kind (documents or
//! projects). Shutting it down releases the subscription before the
//! coalescer's timers are cancelled.

use crate::feed::Subscription;
use quiesce_core::{Coalescer, EntityKind, KeyPolicy};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct Forwarder<P: KeyPolicy> {
    coalescer: Coalescer<P>,
    cancel: CancellationToken,
    task: JoinHandle<u64>,
}

impl<P: KeyPolicy> Forwarder<P> {
    /// Start forwarding notices from `subscription` into `coalescer`
    ///
    /// With `only` set, notices for other entity kinds are skipped.
    pub fn spawn(mut subscription: Subscription, coalescer: Coalescer<P>, only: Option<EntityKind>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let target = coalescer.clone();

        let task = tokio::spawn(async move {
            let mut forwarded = 0u64;
            loop {
                let notice = tokio::select! {
                    _ = token.cancelled() => break,
                    notice = subscription.recv() => match notice {
                        Some(notice) => notice,
                        None => break,
                    },
                };

                if only.is_some_and(|entity| notice.key.kind.entity() != entity) {
                    continue;
                }
                target.notify(notice.key, notice.snapshot);
                forwarded += 1;
            }

            debug!(
                "Forwarder for subscriber {} stopped after {} notices",
                subscription.id(),
                forwarded
            );
            forwarded
        });

        Self {
            coalescer,
            cancel,
            task,
        }
    }

    pub fn coalescer(&self) -> &Coalescer<P> {
        &self.coalescer
    }

    /// Stop forwarding and shut the coalescer down
    ///
    /// Returns the number of pending entries discarded.
    pub async fn shutdown(self) -> usize {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Forwarder task failed: {}", e);
        }
        self.coalescer.shutdown()
    }
}
