use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use tracing::{debug, info, warn};

use crate::{ConfigError, ConfigSource, EffectConfig};

/// Result of a reload check at a frame boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// No reload was requested.
    Idle,
    /// A reload is still in flight.
    Pending,
    /// A new snapshot replaced the active one.
    Applied,
    /// The reload failed; the active snapshot is untouched.
    Kept,
}

/// Holds the active [`EffectConfig`] snapshot.
///
/// Readers take an `Arc` and keep it for the duration of a frame. A reload
/// never touches a published snapshot, it swaps the reference once a complete
/// replacement exists, so a draw in progress cannot observe a half-written config.
pub struct ConfigSlot {
    current: Arc<EffectConfig>,
    pending: Option<PendingReload>,
}

struct PendingReload {
    source: ConfigSource,
    receiver: Receiver<Result<EffectConfig, ConfigError>>,
}

impl ConfigSlot {
    pub fn new() -> Self {
        Self::with_config(EffectConfig::default())
    }

    pub fn with_config(config: EffectConfig) -> Self {
        Self {
            current: Arc::new(config),
            pending: None,
        }
    }

    pub fn snapshot(&self) -> Arc<EffectConfig> {
        Arc::clone(&self.current)
    }

    pub fn replace(&mut self, config: EffectConfig) {
        self.current = Arc::new(config);
    }

    pub fn is_reloading(&self) -> bool {
        self.pending.is_some()
    }

    /// Starts a background fetch of `source`. Returns `false` when a reload is
    /// already in flight or the worker could not be started.
    pub fn spawn_reload(&mut self, source: ConfigSource) -> bool {
        if let Some(pending) = &self.pending {
            debug!(
                requested = %source,
                in_flight = %pending.source,
                "config reload already in flight; ignoring request"
            );
            return false;
        }

        let (sender, receiver) = bounded(1);
        let worker_source = source.clone();
        let spawned = thread::Builder::new()
            .name("effect-config-reload".into())
            .spawn(move || {
                let result = worker_source.fetch();
                // The slot may be gone by now; a late result is simply dropped.
                if sender.send(result).is_err() {
                    debug!(source = %worker_source, "config reload finished after teardown; discarding");
                }
            });

        match spawned {
            Ok(_) => {
                self.pending = Some(PendingReload { source, receiver });
                true
            }
            Err(err) => {
                warn!(error = %err, "failed to start config reload worker");
                false
            }
        }
    }

    /// Applies a finished background reload, if any. Call once per frame.
    pub fn poll_reload(&mut self) -> ReloadOutcome {
        let Some(pending) = self.pending.take() else {
            return ReloadOutcome::Idle;
        };

        match pending.receiver.try_recv() {
            Ok(Ok(config)) => {
                info!(source = %pending.source, "applied effect config");
                self.replace(config);
                ReloadOutcome::Applied
            }
            Ok(Err(err)) => {
                debug!(source = %pending.source, error = %err, "config reload failed; keeping current config");
                ReloadOutcome::Kept
            }
            Err(TryRecvError::Empty) => {
                self.pending = Some(pending);
                ReloadOutcome::Pending
            }
            Err(TryRecvError::Disconnected) => {
                warn!(source = %pending.source, "config reload worker exited without a result");
                ReloadOutcome::Kept
            }
        }
    }

    /// Parses an already-fetched payload and swaps it in on success.
    pub fn apply_payload(&mut self, payload: &str) -> ReloadOutcome {
        match EffectConfig::from_json_str(payload) {
            Ok(config) => {
                self.replace(config);
                ReloadOutcome::Applied
            }
            Err(err) => {
                debug!(error = %err, "rejected config payload; keeping current config");
                ReloadOutcome::Kept
            }
        }
    }
}

impl Default for ConfigSlot {
    fn default() -> Self {
        Self::new()
    }
}
