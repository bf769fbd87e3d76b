//! Bounded-concurrency /24 sweep.
//!
//! One task per host, gated by a semaphore. Cancellation is cooperative: it
//! stops new probes from being admitted past the gate and is observed by the
//! prober between its network steps; admitted probes are never aborted.
//! The final report is emitted only after every task has been joined.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use log::{debug, info, warn};
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use crate::model::{DeviceRecord, ScanEvent, ScanReport, ScanStatus};
use crate::util::SubnetPrefix;

use super::prober::Probe;

// ── Cancellation ──────────────────────────────────────────────────────────────

/// Shared, monotonic cancel flag for one scan.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. There is no way to clear it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Result collection ─────────────────────────────────────────────────────────

/// Devices found so far, unique by address, in arrival order.
///
/// Safe to append from many probe tasks while the shell reads snapshots.
#[derive(Debug, Default)]
pub struct ResultSet {
    inner: Mutex<(Vec<DeviceRecord>, HashSet<Ipv4Addr>)>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record` unless its address is already present.
    /// Returns `true` when the record was new.
    pub fn insert(&self, record: DeviceRecord) -> bool {
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (list, seen) = &mut *guard;
        if !seen.insert(record.address) {
            return false;
        }
        list.push(record);
        true
    }

    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        match self.inner.lock() {
            Ok(g) => g.0.clone(),
            Err(poisoned) => poisoned.into_inner().0.clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(g) => g.0.len(),
            Err(poisoned) => poisoned.into_inner().0.len(),
        }
    }
}

// ── Observer port ─────────────────────────────────────────────────────────────

/// Receives live scan results.
pub trait ScanObserver: Send + Sync {
    fn device_found(&self, record: &DeviceRecord);
    fn scan_finished(&self, report: &ScanReport);
}

/// Observer that ignores every event.
pub struct NoopObserver;

impl ScanObserver for NoopObserver {
    fn device_found(&self, _record: &DeviceRecord) {}
    fn scan_finished(&self, _report: &ScanReport) {}
}

/// Forwards scan events into an unbounded channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ScanEvent>,
}

impl ChannelObserver {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ScanEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelObserver { tx }, rx)
    }
}

impl ScanObserver for ChannelObserver {
    fn device_found(&self, record: &DeviceRecord) {
        let _ = self.tx.send(ScanEvent::DeviceFound(record.clone()));
    }

    fn scan_finished(&self, report: &ScanReport) {
        let _ = self.tx.send(ScanEvent::Finished(report.clone()));
    }
}

// ── Scanner ───────────────────────────────────────────────────────────────────

/// How one probe task settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Found,
    NotFound,
    Skipped,
    GateClosed,
}

/// Sweeps a /24 with at most `concurrency` probes in flight.
pub struct SubnetScanner {
    probe:       Arc<dyn Probe>,
    concurrency: usize,
    observer:    Arc<dyn ScanObserver>,
}

impl SubnetScanner {
    pub fn new(probe: Arc<dyn Probe>, concurrency: usize, observer: Arc<dyn ScanObserver>) -> Self {
        SubnetScanner {
            probe,
            concurrency: concurrency.max(1),
            observer,
        }
    }

    /// Scan `prefix.1..=prefix.254` into a fresh result set.
    pub async fn scan(&self, prefix: SubnetPrefix, cancel: &CancelToken) -> ScanReport {
        self.scan_into(prefix, cancel, Arc::new(ResultSet::new())).await
    }

    /// Scan `prefix.1..=prefix.254`, accumulating matches into `results`.
    ///
    /// After `cancel` fires, admitted probes still run to completion but
    /// their finds are discarded: a cancelled scan reports no late devices.
    pub async fn scan_into(
        &self,
        prefix:  SubnetPrefix,
        cancel:  &CancelToken,
        results: Arc<ResultSet>,
    ) -> ScanReport {
        let scan_id = Uuid::new_v4().to_string();
        info!("[{scan_id}] scanning subnet {prefix}.0/24 ({} concurrent)", self.concurrency);

        let gate = Arc::new(Semaphore::new(self.concurrency));
        let admitted = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(254);

        for ip in prefix.hosts() {
            if cancel.is_cancelled() {
                break;
            }
            let gate     = Arc::clone(&gate);
            let admitted = Arc::clone(&admitted);
            let probe    = Arc::clone(&self.probe);
            let observer = Arc::clone(&self.observer);
            let results  = Arc::clone(&results);
            let cancel   = cancel.clone();

            handles.push(tokio::spawn(async move {
                let _permit = match gate.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return Settled::GateClosed,
                };
                if cancel.is_cancelled() {
                    return Settled::Skipped;
                }
                admitted.fetch_add(1, Ordering::SeqCst);

                let Some(record) = probe.probe(ip, &cancel).await else {
                    return Settled::NotFound;
                };
                if cancel.is_cancelled() {
                    debug!("dropping {ip}: scan cancelled");
                    return Settled::Skipped;
                }
                if results.insert(record.clone()) {
                    debug!("{ip}: camera added ({} found so far)", results.len());
                    observer.device_found(&record);
                }
                Settled::Found
            }));
        }

        let mut faults = 0usize;
        let mut gate_closed = false;
        for outcome in join_all(handles).await {
            match outcome {
                Ok(Settled::GateClosed) => gate_closed = true,
                Ok(_) => {}
                Err(e) => {
                    faults += 1;
                    warn!("[{scan_id}] probe task fault: {e}");
                }
            }
        }

        let status = if gate_closed {
            ScanStatus::Failed("concurrency gate closed".into())
        } else if cancel.is_cancelled() {
            ScanStatus::Cancelled
        } else {
            ScanStatus::Completed
        };

        let report = ScanReport {
            scan_id,
            prefix,
            status,
            devices:  results.snapshot(),
            admitted: admitted.load(Ordering::SeqCst),
        };
        info!(
            "[{}] {} ({} probed, {faults} faulted)",
            report.scan_id,
            report.summary(),
            report.admitted
        );
        self.observer.scan_finished(&report);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::config::ScoutConfig;
    use crate::discovery::prober::tests::FakeNet;
    use crate::discovery::HostProber;
    use crate::http::HttpReply;

    /// Records every address that entered the probe body.
    #[derive(Default)]
    struct CountingProbe {
        entered:   Mutex<Vec<Ipv4Addr>>,
        hits:      Vec<Ipv4Addr>,
        /// Cancel the token once this many probes have entered.
        cancel_at: Option<(usize, CancelToken)>,
    }

    #[async_trait]
    impl Probe for CountingProbe {
        async fn probe(&self, ip: Ipv4Addr, _cancel: &CancelToken) -> Option<DeviceRecord> {
            let n = {
                let mut entered = self.entered.lock().unwrap();
                entered.push(ip);
                entered.len()
            };
            if let Some((at, token)) = &self.cancel_at {
                if n == *at {
                    token.cancel();
                }
            }
            tokio::task::yield_now().await;
            self.hits.contains(&ip).then(|| DeviceRecord::online(ip, "Tapo Camera"))
        }
    }

    /// Emits the same address for every host, as racing duplicate detections would.
    struct DuplicateProbe;

    #[async_trait]
    impl Probe for DuplicateProbe {
        async fn probe(&self, _ip: Ipv4Addr, _cancel: &CancelToken) -> Option<DeviceRecord> {
            Some(DeviceRecord::online(Ipv4Addr::new(10, 0, 0, 7), "Tapo Camera"))
        }
    }

    #[derive(Default)]
    struct Recorder {
        found:    Mutex<Vec<Ipv4Addr>>,
        finished: Mutex<Vec<ScanReport>>,
    }

    impl ScanObserver for Recorder {
        fn device_found(&self, record: &DeviceRecord) {
            self.found.lock().unwrap().push(record.address);
        }
        fn scan_finished(&self, report: &ScanReport) {
            self.finished.lock().unwrap().push(report.clone());
        }
    }

    const PREFIX: SubnetPrefix = SubnetPrefix([192, 168, 1]);

    #[tokio::test]
    async fn probes_exactly_the_254_hosts() {
        let probe = Arc::new(CountingProbe::default());
        let scanner = SubnetScanner::new(probe.clone(), 100, Arc::new(NoopObserver));
        let report = scanner.scan(PREFIX, &CancelToken::new()).await;

        let mut entered = probe.entered.lock().unwrap().clone();
        entered.sort();
        let expected: Vec<Ipv4Addr> = PREFIX.hosts().collect();
        assert_eq!(entered, expected);
        assert_eq!(report.admitted, 254);
        assert_eq!(report.status, ScanStatus::Completed);
        assert!(report.devices.is_empty());
    }

    #[tokio::test]
    async fn duplicate_detections_collapse_to_one_record() {
        let recorder = Arc::new(Recorder::default());
        let scanner = SubnetScanner::new(Arc::new(DuplicateProbe), 16, recorder.clone());
        let report = scanner.scan(PREFIX, &CancelToken::new()).await;

        assert_eq!(report.devices.len(), 1);
        assert_eq!(*recorder.found.lock().unwrap(), vec![Ipv4Addr::new(10, 0, 0, 7)]);
    }

    #[tokio::test]
    async fn cancel_stops_admission() {
        let cancel = CancelToken::new();
        let probe = Arc::new(CountingProbe {
            hits: vec![PREFIX.host(1), PREFIX.host(2), PREFIX.host(200)],
            cancel_at: Some((3, cancel.clone())),
            ..Default::default()
        });
        let recorder = Arc::new(Recorder::default());
        let scanner = SubnetScanner::new(probe.clone(), 1, recorder.clone());
        let report = scanner.scan(PREFIX, &cancel).await;

        let entered = probe.entered.lock().unwrap().clone();
        assert_eq!(entered.len(), 3);
        assert_eq!(report.admitted, 3);
        assert_eq!(report.status, ScanStatus::Cancelled);
        assert!(report.devices.len() <= 2);
        for dev in &report.devices {
            assert!(entered.contains(&dev.address));
        }
        assert_eq!(recorder.finished.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pre_cancelled_scan_admits_nothing() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let probe = Arc::new(CountingProbe::default());
        let scanner = SubnetScanner::new(probe.clone(), 100, Arc::new(NoopObserver));
        let report = scanner.scan(PREFIX, &cancel).await;

        assert!(probe.entered.lock().unwrap().is_empty());
        assert_eq!(report.status, ScanStatus::Cancelled);
        assert_eq!(report.summary(), "Scan cancelled");
    }

    #[tokio::test]
    async fn finished_event_follows_every_found_event() {
        let (observer, mut rx) = ChannelObserver::channel();
        let probe = Arc::new(CountingProbe {
            hits: vec![PREFIX.host(10), PREFIX.host(20)],
            ..Default::default()
        });
        let scanner = SubnetScanner::new(probe, 50, Arc::new(observer));
        scanner.scan(PREFIX, &CancelToken::new()).await;

        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], ScanEvent::DeviceFound(_)));
        assert!(matches!(events[1], ScanEvent::DeviceFound(_)));
        match &events[2] {
            ScanEvent::Finished(report) => assert_eq!(report.devices.len(), 2),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_tapo_on_the_subnet() {
        let cam = PREFIX.host(50);
        let mut net = FakeNet { reachable: vec![cam], ..Default::default() };
        net.replies.insert(
            "https://192.168.1.50".into(),
            HttpReply::new(200, "<html>TP-LINK</html>"),
        );
        let prober = HostProber::new(Arc::new(net), &ScoutConfig::default());
        let scanner = SubnetScanner::new(Arc::new(prober), 100, Arc::new(NoopObserver));

        let prefix: SubnetPrefix = "192.168.1.0/24".parse().unwrap();
        let report = scanner.scan(prefix, &CancelToken::new()).await;

        assert_eq!(report.status, ScanStatus::Completed);
        assert_eq!(report.devices.len(), 1);
        let dev = &report.devices[0];
        assert_eq!(dev.address.to_string(), "192.168.1.50");
        assert_eq!(dev.status.to_string(), "Online");
        assert_eq!(dev.display_model, "Tapo Camera");
    }

    /// Tracks how many probes are inside the probe body at once.
    #[derive(Default)]
    struct GaugeProbe {
        inside: AtomicUsize,
        peak:   AtomicUsize,
    }

    #[async_trait]
    impl Probe for GaugeProbe {
        async fn probe(&self, _ip: Ipv4Addr, _cancel: &CancelToken) -> Option<DeviceRecord> {
            let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.inside.fetch_sub(1, Ordering::SeqCst);
            None
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn in_flight_probes_never_exceed_the_gate() {
        let probe = Arc::new(GaugeProbe::default());
        let scanner = SubnetScanner::new(probe.clone(), 100, Arc::new(NoopObserver));
        let report = scanner.scan(PREFIX, &CancelToken::new()).await;

        let peak = probe.peak.load(Ordering::SeqCst);
        assert!(peak <= 100, "peak {peak} exceeded the gate");
        assert!(peak >= 90, "peak {peak}: probes ran close to serially");
        assert_eq!(report.admitted, 254);
        assert_eq!(probe.inside.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn result_set_is_unique_by_address() {
        let set = ResultSet::new();
        let ip = Ipv4Addr::new(192, 168, 1, 9);
        assert!(set.insert(DeviceRecord::online(ip, "a")));
        assert!(!set.insert(DeviceRecord::online(ip, "b")));
        assert_eq!(set.len(), 1);
        assert_eq!(set.snapshot()[0].display_model, "a");
    }
}
