//! Operator surface: scan trigger, device selection and PTZ dispatch.
//!
//! At most one scan runs at a time and at most one PTZ controller is live.
//! Selecting a new device fully disconnects the previous controller before
//! the next one is built.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::{info, warn};
use tokio::task::JoinHandle;

use crate::config::ScoutConfig;
use crate::discovery::{CancelToken, HostProber, NetTransport, Probe, ResultSet, ScanObserver, SubnetScanner};
use crate::error::{Result, ScoutError};
use crate::model::{DeviceRecord, ScanReport, ScanStatus};
use crate::ptz::{build_controller, Credentials, Direction, Protocol, PtzController, DEFAULT_SPEED};
use crate::util::SubnetPrefix;

/// Builds a controller for a selected device.
pub type ControllerFactory =
    Box<dyn Fn(Protocol, &str, Credentials, &ScoutConfig) -> Result<Box<dyn PtzController>> + Send + Sync>;

// ── PTZ actions ───────────────────────────────────────────────────────────────

/// One operator PTZ request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PtzAction {
    Connect,
    Move(Direction),
    Stop,
    /// 0-based preset index.
    Preset(u32),
}

impl fmt::Display for PtzAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PtzAction::Connect   => f.write_str("connect"),
            PtzAction::Move(d)   => write!(f, "move {d:?}"),
            PtzAction::Stop      => f.write_str("stop"),
            PtzAction::Preset(n) => write!(f, "preset {n}"),
        }
    }
}

impl FromStr for PtzAction {
    type Err = ScoutError;

    /// `connect`, `stop`, `preset N` or a direction word.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let head = words.next().unwrap_or_default().to_ascii_lowercase();
        match head.as_str() {
            "connect" => Ok(PtzAction::Connect),
            "stop"    => Ok(PtzAction::Stop),
            "preset"  => {
                let n = words
                    .next()
                    .and_then(|w| w.parse().ok())
                    .ok_or_else(|| ScoutError::Config("usage: preset <index>".into()))?;
                Ok(PtzAction::Preset(n))
            }
            other => other.parse().map(PtzAction::Move),
        }
    }
}

// ── Console commands ──────────────────────────────────────────────────────────

/// A line typed at the interactive console.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Scan(Option<String>),
    Cancel,
    List,
    /// 1-based position in the device list.
    Select(usize, Option<Protocol>),
    Ptz(PtzAction),
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = ScoutError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let line = s.trim();
        let mut words = line.split_whitespace();
        let head = words.next().unwrap_or_default().to_ascii_lowercase();
        match head.as_str() {
            "scan"   => Ok(ConsoleCommand::Scan(words.next().map(str::to_string))),
            "cancel" => Ok(ConsoleCommand::Cancel),
            "list" | "ls" => Ok(ConsoleCommand::List),
            "select" => {
                let n = words
                    .next()
                    .and_then(|w| w.parse().ok())
                    .filter(|n| *n > 0)
                    .ok_or_else(|| ScoutError::Config("usage: select <n> [tapo|onvif]".into()))?;
                let protocol = words.next().map(str::parse).transpose()?;
                Ok(ConsoleCommand::Select(n, protocol))
            }
            "help" | "?"    => Ok(ConsoleCommand::Help),
            "quit" | "exit" => Ok(ConsoleCommand::Quit),
            _ => line.parse().map(ConsoleCommand::Ptz),
        }
    }
}

pub const CONSOLE_HELP: &str = "\
commands:
  scan [prefix]        sweep a /24 (default: detected local subnet)
  cancel               stop the running scan
  list                 show devices found
  select N [protocol]  control device N (tapo|onvif)
  connect              authenticate with the selected device
  up|down|left|right   continuous motion
  in|out               zoom
  stop                 halt motion
  preset N             go to preset N (0-based)
  quit";

// ── Shell ─────────────────────────────────────────────────────────────────────

struct RunningScan {
    cancel: CancelToken,
    handle: JoinHandle<ScanReport>,
}

pub struct Shell {
    cfg:         Arc<ScoutConfig>,
    probe:       Arc<dyn Probe>,
    observer:    Arc<dyn ScanObserver>,
    factory:     ControllerFactory,
    results:     Arc<ResultSet>,
    scan:        Option<RunningScan>,
    last_report: Option<ScanReport>,
    controller:  Option<Box<dyn PtzController>>,
}

impl Shell {
    /// Shell wired to the real network.
    pub fn new(cfg: Arc<ScoutConfig>, observer: Arc<dyn ScanObserver>) -> Result<Self> {
        let transport = Arc::new(NetTransport::new(cfg.fingerprint_timeout)?);
        let probe: Arc<dyn Probe> = Arc::new(HostProber::new(transport, &cfg));
        let factory: ControllerFactory = Box::new(build_controller);
        Ok(Self::with_parts(cfg, probe, observer, factory))
    }

    pub fn with_parts(
        cfg:      Arc<ScoutConfig>,
        probe:    Arc<dyn Probe>,
        observer: Arc<dyn ScanObserver>,
        factory:  ControllerFactory,
    ) -> Self {
        Shell {
            cfg,
            probe,
            observer,
            factory,
            results:     Arc::new(ResultSet::new()),
            scan:        None,
            last_report: None,
            controller:  None,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.as_ref().is_some_and(|s| !s.handle.is_finished())
    }

    /// Start sweeping `prefix` in the background. An empty or malformed
    /// prefix falls back to the local subnet.
    pub fn start_scan(&mut self, prefix: &str) -> Result<SubnetPrefix> {
        if self.is_scanning() {
            return Err(ScoutError::Config("a scan is already running".into()));
        }
        let prefix = SubnetPrefix::parse_or_detect(prefix);
        let cancel = CancelToken::new();
        self.results = Arc::new(ResultSet::new());
        self.last_report = None;

        let scanner = SubnetScanner::new(
            Arc::clone(&self.probe),
            self.cfg.scan_concurrency,
            Arc::clone(&self.observer),
        );
        let results = Arc::clone(&self.results);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { scanner.scan_into(prefix, &token, results).await });

        self.scan = Some(RunningScan { cancel, handle });
        Ok(prefix)
    }

    /// Request cancellation of the running scan. Returns `false` when idle.
    pub fn cancel_scan(&self) -> bool {
        match &self.scan {
            Some(scan) if !scan.handle.is_finished() => {
                info!("stopping network scan...");
                scan.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Cancel token of the running scan, for signal handlers.
    pub fn cancel_handle(&self) -> Option<CancelToken> {
        self.scan.as_ref().map(|s| s.cancel.clone())
    }

    /// Wait for the current scan to settle and return its report.
    pub async fn wait_scan(&mut self) -> Option<ScanReport> {
        if let Some(scan) = self.scan.take() {
            let report = match scan.handle.await {
                Ok(report) => report,
                Err(e) => {
                    warn!("scan task failed: {e}");
                    ScanReport {
                        scan_id:  String::new(),
                        prefix:   SubnetPrefix::parse_or_detect(&self.cfg.subnet),
                        status:   ScanStatus::Failed(e.to_string()),
                        devices:  self.results.snapshot(),
                        admitted: 0,
                    }
                }
            };
            self.last_report = Some(report);
        }
        self.last_report.clone()
    }

    /// Devices found by the current or most recent scan.
    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.results.snapshot()
    }

    /// Bind a controller to `address`, replacing any previous one.
    pub fn select_device(&mut self, address: &str, protocol: Option<Protocol>) -> Result<&mut dyn PtzController> {
        if let Some(mut old) = self.controller.take() {
            info!("releasing {} ({})", old.address(), old.protocol());
            old.disconnect();
        }
        let protocol = protocol.unwrap_or(self.cfg.protocol);
        let credentials = Credentials::new(self.cfg.username.clone(), self.cfg.password.clone());
        let controller = (self.factory)(protocol, address, credentials, &self.cfg)?;
        info!("selected {address} ({protocol})");
        Ok(self.controller.insert(controller).as_mut())
    }

    pub fn controller(&mut self) -> Option<&mut (dyn PtzController + 'static)> {
        self.controller.as_deref_mut()
    }

    /// Run one PTZ action on the selected device, logging the outcome.
    pub async fn ptz(&mut self, action: PtzAction) -> Result<()> {
        let Some(ctl) = self.controller.as_deref_mut() else {
            return Err(ScoutError::Config("no device selected".into()));
        };
        let result = match action {
            PtzAction::Connect   => ctl.connect().await,
            PtzAction::Move(dir) => ctl.move_direction(dir, DEFAULT_SPEED).await,
            PtzAction::Stop      => ctl.stop().await,
            PtzAction::Preset(n) => ctl.goto_preset(n).await,
        };
        match &result {
            Ok(()) => match ctl.device_label() {
                Some(label) if action == PtzAction::Connect => {
                    info!("{action} on {}: ok ({label})", ctl.address())
                }
                _ => info!("{action} on {}: ok", ctl.address()),
            },
            Err(e) => warn!("{action} on {}: failed: {e}", ctl.address()),
        }
        result
    }

    /// Execute one console command; returns text for the operator.
    pub async fn execute(&mut self, cmd: ConsoleCommand) -> Result<String> {
        match cmd {
            ConsoleCommand::Scan(prefix) => {
                let prefix = prefix.unwrap_or_else(|| self.cfg.subnet.clone());
                let p = self.start_scan(&prefix)?;
                Ok(format!("scanning {p}.0/24"))
            }
            ConsoleCommand::Cancel => Ok(if self.cancel_scan() {
                "cancelling scan".to_string()
            } else {
                "no scan running".to_string()
            }),
            ConsoleCommand::List => Ok(render_devices(&self.devices())),
            ConsoleCommand::Select(n, protocol) => {
                let devices = self.devices();
                let record = n
                    .checked_sub(1)
                    .and_then(|i| devices.get(i))
                    .ok_or_else(|| ScoutError::Config(format!("no device #{n}")))?;
                let ctl = self.select_device(&record.address.to_string(), protocol)?;
                Ok(format!("selected {} ({})", ctl.address(), ctl.protocol()))
            }
            ConsoleCommand::Ptz(action) => {
                self.ptz(action).await?;
                Ok(format!("{action}: ok"))
            }
            ConsoleCommand::Help => Ok(CONSOLE_HELP.to_string()),
            ConsoleCommand::Quit => {
                self.shutdown();
                Ok(String::new())
            }
        }
    }

    /// Cancel any scan and drop the live controller.
    pub fn shutdown(&mut self) {
        self.cancel_scan();
        if let Some(mut ctl) = self.controller.take() {
            ctl.disconnect();
        }
    }
}

/// Numbered device table for the console.
pub fn render_devices(devices: &[DeviceRecord]) -> String {
    if devices.is_empty() {
        return "no devices".to_string();
    }
    devices
        .iter()
        .enumerate()
        .map(|(i, d)| format!("{:>3}. {d}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    use crate::discovery::prober::tests::FakeNet;
    use crate::discovery::scanner::NoopObserver;
    use crate::http::HttpReply;
    use crate::ptz::SessionState;

    type Journal = Arc<Mutex<Vec<String>>>;

    /// Controller that only writes what happened to it into a journal.
    struct RecordingController {
        host:    String,
        journal: Journal,
    }

    #[async_trait]
    impl PtzController for RecordingController {
        fn protocol(&self) -> Protocol {
            Protocol::Onvif
        }
        fn address(&self) -> &str {
            &self.host
        }
        fn state(&self) -> SessionState {
            SessionState::Unauthenticated
        }
        async fn connect(&mut self) -> Result<()> {
            Err(ScoutError::Auth("bad password".into()))
        }
        async fn move_axes(&mut self, pan: f32, tilt: f32, zoom: f32) -> Result<()> {
            self.journal.lock().unwrap().push(format!("move {} {pan} {tilt} {zoom}", self.host));
            Ok(())
        }
        async fn stop(&mut self) -> Result<()> {
            self.journal.lock().unwrap().push(format!("stop {}", self.host));
            Ok(())
        }
        async fn goto_preset(&mut self, index: u32) -> Result<()> {
            self.journal.lock().unwrap().push(format!("preset {} {index}", self.host));
            Ok(())
        }
        fn disconnect(&mut self) {
            self.journal.lock().unwrap().push(format!("disconnect {}", self.host));
        }
    }

    fn recording_factory(journal: Journal) -> ControllerFactory {
        Box::new(
            move |protocol: Protocol, host: &str, _creds: Credentials, _cfg: &ScoutConfig|
                  -> Result<Box<dyn PtzController>> {
                journal.lock().unwrap().push(format!("build {host} {protocol}"));
                Ok(Box::new(RecordingController { host: host.to_string(), journal: Arc::clone(&journal) }))
            },
        )
    }

    fn shell_with(probe: Arc<dyn Probe>, journal: Journal) -> Shell {
        Shell::with_parts(
            Arc::new(ScoutConfig::default()),
            probe,
            Arc::new(NoopObserver),
            recording_factory(journal),
        )
    }

    /// Probe that parks until the test releases permits.
    struct ParkedProbe {
        release: Semaphore,
    }

    #[async_trait]
    impl Probe for ParkedProbe {
        async fn probe(&self, _ip: Ipv4Addr, _cancel: &CancelToken) -> Option<DeviceRecord> {
            let _ = self.release.acquire().await.ok()?;
            None
        }
    }

    #[test]
    fn parses_console_commands() {
        assert_eq!("scan".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Scan(None));
        assert_eq!(
            "scan 10.0.0".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Scan(Some("10.0.0".into()))
        );
        assert_eq!(
            "select 2 onvif".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Select(2, Some(Protocol::Onvif))
        );
        assert_eq!(
            " UP ".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Ptz(PtzAction::Move(Direction::Up))
        );
        assert_eq!(
            "preset 3".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Ptz(PtzAction::Preset(3))
        );
        assert_eq!("quit".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Quit);
        for bad in ["select 0", "select x", "preset", "jump", "select 1 visca"] {
            assert!(bad.parse::<ConsoleCommand>().is_err(), "{bad}");
        }
    }

    #[tokio::test]
    async fn scan_finds_the_camera() {
        let cam = Ipv4Addr::new(192, 168, 1, 50);
        let mut net = FakeNet { reachable: vec![cam], ..Default::default() };
        net.replies.insert("https://192.168.1.50".into(), HttpReply::new(200, "TP-LINK"));
        let cfg = Arc::new(ScoutConfig::default());
        let probe: Arc<dyn Probe> = Arc::new(HostProber::new(Arc::new(net), &cfg));
        let mut shell = shell_with(probe, Journal::default());

        let prefix = shell.start_scan("192.168.1.0/24").unwrap();
        assert_eq!(prefix.to_string(), "192.168.1");
        let report = shell.wait_scan().await.unwrap();

        assert_eq!(report.status, ScanStatus::Completed);
        assert_eq!(report.summary(), "Scan complete - Found 1 camera(s)");
        let devices = shell.devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].address, cam);
        assert_eq!(devices[0].display_model, "Tapo Camera");
    }

    #[tokio::test]
    async fn one_scan_at_a_time_and_cancel_is_reported() {
        let probe = Arc::new(ParkedProbe { release: Semaphore::new(0) });
        let mut shell = shell_with(probe.clone(), Journal::default());

        shell.start_scan("10.1.2").unwrap();
        assert!(shell.is_scanning());
        assert!(shell.start_scan("10.1.2").is_err());

        assert!(shell.cancel_scan());
        probe.release.add_permits(254);
        let report = shell.wait_scan().await.unwrap();
        assert_eq!(report.status, ScanStatus::Cancelled);
        assert_eq!(report.summary(), "Scan cancelled");
        assert!(!shell.cancel_scan());

        // A settled scan no longer blocks the next one.
        shell.start_scan("10.1.2").unwrap();
        shell.wait_scan().await.unwrap();
    }

    #[tokio::test]
    async fn selecting_disconnects_the_previous_device_first() {
        let journal = Journal::default();
        let mut shell = shell_with(Arc::new(ParkedProbe { release: Semaphore::new(0) }), journal.clone());

        shell.select_device("10.0.0.1", None).unwrap();
        shell.select_device("10.0.0.2", Some(Protocol::Onvif)).unwrap();
        assert_eq!(shell.controller().unwrap().address(), "10.0.0.2");
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["build 10.0.0.1 tapo", "disconnect 10.0.0.1", "build 10.0.0.2 onvif"]
        );
    }

    #[tokio::test]
    async fn ptz_actions_reach_the_controller() {
        let journal = Journal::default();
        let mut shell = shell_with(Arc::new(ParkedProbe { release: Semaphore::new(0) }), journal.clone());

        assert!(shell.ptz(PtzAction::Stop).await.is_err());

        shell.select_device("10.0.0.9", None).unwrap();
        shell.ptz(PtzAction::Move(Direction::Left)).await.unwrap();
        shell.ptz(PtzAction::Preset(2)).await.unwrap();
        shell.ptz(PtzAction::Stop).await.unwrap();
        assert!(matches!(shell.ptz(PtzAction::Connect).await, Err(ScoutError::Auth(_))));

        assert_eq!(
            journal.lock().unwrap()[1..],
            ["move 10.0.0.9 -0.5 0 0", "preset 10.0.0.9 2", "stop 10.0.0.9"]
        );
    }

    #[tokio::test]
    async fn console_select_uses_list_position() {
        let cam = Ipv4Addr::new(192, 168, 7, 20);
        let mut net = FakeNet { reachable: vec![cam], ..Default::default() };
        net.replies.insert("https://192.168.7.20".into(), HttpReply::new(401, ""));
        let cfg = Arc::new(ScoutConfig::default());
        let probe: Arc<dyn Probe> = Arc::new(HostProber::new(Arc::new(net), &cfg));
        let journal = Journal::default();
        let mut shell = shell_with(probe, journal.clone());

        shell.execute(ConsoleCommand::Scan(Some("192.168.7".into()))).await.unwrap();
        shell.wait_scan().await;
        let listing = shell.execute(ConsoleCommand::List).await.unwrap();
        assert!(listing.starts_with("  1. 192.168.7.20"), "{listing}");

        assert!(shell.execute(ConsoleCommand::Select(2, None)).await.is_err());
        let msg = shell.execute(ConsoleCommand::Select(1, None)).await.unwrap();
        assert_eq!(msg, "selected 192.168.7.20 (onvif)");

        shell.execute(ConsoleCommand::Quit).await.unwrap();
        assert!(shell.controller().is_none());
        assert_eq!(journal.lock().unwrap().last().unwrap(), "disconnect 192.168.7.20");
    }

    #[test]
    fn empty_device_list_renders() {
        assert_eq!(render_devices(&[]), "no devices");
    }
}
