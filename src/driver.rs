//! Debounced event loop.
//!
//! One sequential worker per hosts file: notifications are coalesced
//! into single reconcile passes and a pass already in flight is never
//! overlapped. Cancellation is checked at the wait boundary only, so a
//! started pass always runs to completion.

use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, Instant};

use crate::error::Result;
use crate::mapping::build_mapping;
use crate::reconcile::{ReconcileOutcome, Reconciler};
use crate::runtime::ContainerRuntime;
use crate::types::ChangeEvent;

/// A busy stream keeps resetting the quiet timer; after this many
/// debounce windows a pass runs regardless, so sustained event bursts
/// cannot starve reconciliation.
const MAX_COALESCE_WINDOWS: u32 = 4;

/// Drives snapshot-and-reconcile passes off the notification stream.
pub struct Driver<R> {
    runtime: R,
    reconciler: Reconciler,
    tld: String,
    debounce: Duration,
}

impl<R: ContainerRuntime> Driver<R> {
    pub fn new(
        runtime: R,
        reconciler: Reconciler,
        tld: impl Into<String>,
        debounce: Duration,
    ) -> Self {
        Self {
            runtime,
            reconciler,
            tld: tld.into(),
            debounce,
        }
    }

    /// Runs until `cancel` fires or the notification stream ends.
    ///
    /// Performs one immediate pass, then one debounced pass per burst
    /// of notifications. Pass failures in this loop are logged and
    /// survived; the next notification retries.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<ChangeEvent>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        if let Err(e) = self.pass().await {
            log_pass_error(&e);
        }

        loop {
            tokio::select! {
                _ = cancel.changed() => {
                    info!("cancellation requested, stopping event loop");
                    return Ok(());
                }
                maybe = events.recv() => {
                    let Some(event) = maybe else {
                        info!("notification stream closed, stopping event loop");
                        return Ok(());
                    };
                    debug!("change notification: {:?}", event);
                    self.coalesce(&mut events, &mut cancel).await;
                    if *cancel.borrow() {
                        info!("cancellation requested, stopping event loop");
                        return Ok(());
                    }
                    if let Err(e) = self.pass().await {
                        log_pass_error(&e);
                    }
                }
            }
        }
    }

    /// Drains further notifications until the stream stays quiet for a
    /// full debounce window, or the coalescing deadline passes,
    /// whichever comes first. Cancellation also ends the wait; the
    /// caller checks it before starting a pass.
    async fn coalesce(
        &self,
        events: &mut mpsc::Receiver<ChangeEvent>,
        cancel: &mut watch::Receiver<bool>,
    ) {
        let deadline = Instant::now() + self.debounce * MAX_COALESCE_WINDOWS;
        loop {
            tokio::select! {
                _ = sleep(self.debounce) => return,
                _ = sleep_until(deadline) => {
                    debug!("coalescing deadline reached with notifications still arriving");
                    return;
                }
                _ = cancel.changed() => return,
                more = events.recv() => match more {
                    Some(event) => debug!("coalesced notification: {:?}", event),
                    None => return,
                }
            }
        }
    }

    /// One full snapshot → build → reconcile pass.
    async fn pass(&self) -> Result<()> {
        let records = self.runtime.snapshot().await?;
        let mapping = build_mapping(&records, &self.tld);
        match self.reconciler.reconcile(&mapping)? {
            ReconcileOutcome::Unchanged => debug!("hosts file already up to date"),
            ReconcileOutcome::WouldWrite(content) => {
                info!("dry run, would write:\n{}", content);
            }
            ReconcileOutcome::Written(_) => {}
        }
        Ok(())
    }
}

/// The loop survives pass failures; permission problems get a hint
/// since they will not fix themselves on the next event.
fn log_pass_error(e: &crate::error::HostsdError) {
    if e.is_permission_denied() {
        error!("reconcile failed: {} (insufficient privileges?)", e);
    } else {
        error!("reconcile failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::ContainerNetworkRecord;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct FakeRuntime {
        snapshots: Arc<AtomicUsize>,
        // Snapshot calls up to this count fail, modelling an
        // unreachable daemon at startup.
        failures: usize,
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn snapshot(&self) -> Result<Vec<ContainerNetworkRecord>> {
            let call = self.snapshots.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(crate::error::HostsdError::Runtime("daemon down".into()));
            }
            Ok(vec![ContainerNetworkRecord {
                container_name: "web".into(),
                aliases: vec![],
                network: "bridge".into(),
                ips: vec!["172.17.0.2".parse().unwrap()],
            }])
        }

        async fn subscribe(&self, _tx: mpsc::Sender<ChangeEvent>) -> Result<()> {
            Ok(())
        }
    }

    fn started(name: &str) -> ChangeEvent {
        ChangeEvent::ContainerStarted { name: name.into() }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_notifications_triggers_one_reconcile() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::default();
        let snapshots = runtime.snapshots.clone();
        let driver = Driver::new(
            runtime,
            Reconciler::new(dir.path().join("hosts"), false),
            "localhost",
            Duration::from_millis(300),
        );

        let (tx, rx) = mpsc::channel(16);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        for i in 0..5 {
            tx.send(started(&format!("c{}", i))).await.unwrap();
        }

        let handle = tokio::spawn(driver.run(rx, cancel_rx));
        tokio::time::sleep(Duration::from_secs(2)).await;
        cancel_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        // One initial pass plus one coalesced pass for the burst.
        assert_eq!(snapshots.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn notifications_outside_the_window_each_reconcile() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::default();
        let snapshots = runtime.snapshots.clone();
        let driver = Driver::new(
            runtime,
            Reconciler::new(dir.path().join("hosts"), false),
            "localhost",
            Duration::from_millis(300),
        );

        let (tx, rx) = mpsc::channel(16);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(driver.run(rx, cancel_rx));

        tx.send(started("a")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(started("b")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        cancel_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        // Initial pass plus one per isolated notification.
        assert_eq!(snapshots.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_event_stream_cannot_starve_reconciliation() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::default();
        let snapshots = runtime.snapshots.clone();
        let driver = Driver::new(
            runtime,
            Reconciler::new(dir.path().join("hosts"), false),
            "localhost",
            Duration::from_millis(300),
        );

        let (tx, rx) = mpsc::channel(64);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(driver.run(rx, cancel_rx));

        // Notifications every 200ms never let the 300ms quiet timer
        // elapse; the coalescing deadline must force passes anyway.
        for i in 0..30 {
            tx.send(started(&format!("c{}", i))).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        cancel_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        // 6s of sustained events with a 1.2s deadline: the initial
        // pass plus several forced passes, not one starved pass.
        assert!(
            snapshots.load(Ordering::SeqCst) >= 4,
            "only {} pass(es) ran during sustained events",
            snapshots.load(Ordering::SeqCst)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_ends_the_coalescing_wait() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::default();
        let snapshots = runtime.snapshots.clone();
        let driver = Driver::new(
            runtime,
            Reconciler::new(dir.path().join("hosts"), false),
            "localhost",
            Duration::from_millis(300),
        );

        let (tx, rx) = mpsc::channel(16);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(driver.run(rx, cancel_rx));

        // Cancel mid-window, before the debounced pass starts.
        tx.send(started("web")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        // Only the initial pass ran; the pending pass was not started.
        assert_eq!(snapshots.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resync_notification_recovers_from_failed_initial_pass() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        let runtime = FakeRuntime {
            failures: 1,
            ..Default::default()
        };
        let driver = Driver::new(
            runtime,
            Reconciler::new(&path, false),
            "localhost",
            Duration::from_millis(300),
        );

        let (tx, rx) = mpsc::channel(16);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(driver.run(rx, cancel_rx));

        // Initial pass fails (daemon down); the subscription's resync
        // after its first successful connect must drive a retry.
        tx.send(ChangeEvent::Resync).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        cancel_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("172.17.0.2 web.localhost"));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_stream_stops_the_loop_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        let runtime = FakeRuntime::default();
        let driver = Driver::new(
            runtime,
            Reconciler::new(&path, false),
            "localhost",
            Duration::from_millis(300),
        );

        let (tx, rx) = mpsc::channel(16);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        drop(tx);

        driver.run(rx, cancel_rx).await.unwrap();

        // Initial pass still ran and produced a complete file.
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("172.17.0.2 web.localhost"));
    }
}
