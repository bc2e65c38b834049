//! Debounced reachability monitoring
//!
//! Raw online/offline transitions (from an OS callback or the bundled HTTP
//! probe) are reported through a [`ReachabilityHandle`]. The monitor
//! publishes a transition only once the new state has been stable for the
//! settle window, so rapid flapping does not trigger redundant flushes.
//! Subscribers get the current state immediately and one notification per
//! settled transition.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

/// Configuration for the reachability monitor
#[derive(Debug, Clone)]
pub struct ReachabilityConfig {
    /// How long a new state must hold before it is reported (milliseconds)
    pub settle_window_ms: u64,

    /// State assumed before the first report arrives
    pub assume_online: bool,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            settle_window_ms: 2000,
            assume_online: false,
        }
    }
}

/// Handle for reporting raw reachability transitions
///
/// Cloneable; a mobile embedder feeds OS connectivity callbacks into this,
/// the bundled agent feeds the HTTP probe.
#[derive(Clone)]
pub struct ReachabilityHandle {
    tx: mpsc::Sender<bool>,
}

impl ReachabilityHandle {
    /// Report the currently observed raw state
    ///
    /// Reporting the same state repeatedly is fine; only transitions that
    /// survive the settle window are published.
    pub async fn report(&self, online: bool) {
        // The monitor owning the receiver has shut down; nothing to notify
        let _ = self.tx.send(online).await;
    }
}

/// Debounced reachability monitor
pub struct ReachabilityMonitor {
    config: ReachabilityConfig,
    state_tx: watch::Sender<bool>,
    raw_tx: mpsc::Sender<bool>,
    raw_rx: mpsc::Receiver<bool>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ReachabilityMonitor {
    /// Create a new monitor
    pub fn new(config: ReachabilityConfig, shutdown_rx: broadcast::Receiver<()>) -> Self {
        let (raw_tx, raw_rx) = mpsc::channel(32);
        let (state_tx, _) = watch::channel(config.assume_online);

        Self {
            config,
            state_tx,
            raw_tx,
            raw_rx,
            shutdown_rx,
        }
    }

    /// Get a handle for reporting raw transitions
    pub fn handle(&self) -> ReachabilityHandle {
        ReachabilityHandle {
            tx: self.raw_tx.clone(),
        }
    }

    /// Subscribe to settled reachability state
    ///
    /// The receiver observes the current state immediately via `borrow()`
    /// and wakes once per settled transition.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state_tx.subscribe()
    }

    /// Current settled state
    pub fn current(&self) -> bool {
        *self.state_tx.borrow()
    }

    /// Run the monitor until shutdown
    pub async fn run(mut self) {
        let settle = Duration::from_millis(self.config.settle_window_ms);
        info!(
            settle_ms = self.config.settle_window_ms,
            online = *self.state_tx.borrow(),
            "Starting reachability monitor"
        );

        'outer: loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => break,
                Some(raw) = self.raw_rx.recv() => {
                    if raw == *self.state_tx.borrow() {
                        continue;
                    }

                    // Candidate transition; hold it for the settle window
                    let mut pending = raw;
                    loop {
                        tokio::select! {
                            _ = self.shutdown_rx.recv() => break 'outer,
                            _ = tokio::time::sleep(settle) => {
                                self.state_tx.send_replace(pending);
                                info!(online = pending, "Reachability changed");
                                break;
                            }
                            Some(next) = self.raw_rx.recv() => {
                                if next == *self.state_tx.borrow() {
                                    debug!("Reachability flap discarded");
                                    break;
                                }
                                // Still a transition; restart the settle window
                                pending = next;
                            }
                        }
                    }
                }
            }
        }

        info!("Reachability monitor stopped");
    }
}

/// HTTP reachability probe
///
/// Periodically issues a HEAD request against the configured URL and feeds
/// the result into the monitor. Any completed HTTP exchange counts as
/// online; the server being unhappy is not the same as being unreachable.
pub struct ReachabilityProbe {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    handle: ReachabilityHandle,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ReachabilityProbe {
    /// Create a new probe
    pub fn new(
        url: impl Into<String>,
        interval: Duration,
        handle: ReachabilityHandle,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("Failed to create HTTP client"),
            url: url.into(),
            interval,
            handle,
            shutdown_rx,
        }
    }

    /// Run the probe until shutdown
    pub async fn run(mut self) {
        info!(url = %self.url, interval_secs = self.interval.as_secs(), "Starting reachability probe");
        let mut timer = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => break,
                _ = timer.tick() => {
                    let online = self.check().await;
                    self.handle.report(online).await;
                }
            }
        }

        info!("Reachability probe stopped");
    }

    async fn check(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(_) => true,
            Err(e) => {
                warn!(url = %self.url, error = %e, "Reachability probe failed");
                false
            }
        }
    }
}
