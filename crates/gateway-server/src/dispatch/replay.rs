//! Replay buffer writer
//!
//! Dispatch never awaits the store. Appends are handed to a single writer
//! task over a bounded channel, which keeps per-session append order while
//! keeping the hot path synchronous. A full channel drops the write with a
//! warning; the replay buffer is best-effort by contract.

use gateway_store::SessionStore;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One pending replay append
#[derive(Debug)]
pub struct ReplayWrite {
    pub session_id: String,
    pub seq: u64,
    pub frame: String,
}

/// Handle to the background replay writer task
#[derive(Clone)]
pub struct ReplayWriter {
    tx: mpsc::Sender<ReplayWrite>,
}

impl ReplayWriter {
    /// Spawn the writer task over the given store
    pub fn spawn(store: Arc<dyn SessionStore>, buffer: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<ReplayWrite>(buffer);

        tokio::spawn(async move {
            while let Some(write) = rx.recv().await {
                if let Err(e) = store
                    .append_replay(&write.session_id, write.seq, &write.frame)
                    .await
                {
                    tracing::warn!(
                        session_id = %write.session_id,
                        seq = write.seq,
                        error = %e,
                        "Failed to append replay entry"
                    );
                    continue;
                }

                // Mirror the counter after a successful append so the stored
                // last_seq never runs ahead of the buffer.
                if let Err(e) = store.update_last_seq(&write.session_id, write.seq).await {
                    tracing::warn!(
                        session_id = %write.session_id,
                        seq = write.seq,
                        error = %e,
                        "Failed to mirror last_seq"
                    );
                }
            }

            tracing::debug!("Replay writer stopped");
        });

        Self { tx }
    }

    /// Enqueue a write without blocking
    pub fn enqueue(&self, write: ReplayWrite) {
        if let Err(e) = self.tx.try_send(write) {
            match e {
                mpsc::error::TrySendError::Full(w) => {
                    tracing::warn!(
                        session_id = %w.session_id,
                        seq = w.seq,
                        "Replay queue full, dropping entry"
                    );
                }
                mpsc::error::TrySendError::Closed(_) => {
                    tracing::warn!("Replay writer gone, dropping entry");
                }
            }
        }
    }
}

impl std::fmt::Debug for ReplayWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayWriter").finish()
    }
}
