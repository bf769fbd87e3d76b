//! Per-host probe: reachability → fingerprint → model tag.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};

use crate::config::ScoutConfig;
use crate::model::DeviceRecord;

use super::fingerprint::{FingerprintMatcher, MatchReason, Scheme};
use super::scanner::CancelToken;
use super::transport::ProbeTransport;

/// Anything that can turn one address into zero or one device record.
///
/// Implementations must never fail: every fault is a "not found".
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, ip: Ipv4Addr, cancel: &CancelToken) -> Option<DeviceRecord>;
}

/// Timeouts applied by [`HostProber`].
#[derive(Debug, Clone, Copy)]
pub struct ProbeTimeouts {
    pub ping:        Duration,
    pub fingerprint: Duration,
    pub stream:      Duration,
}

/// Probes one host for a target-vendor camera.
pub struct HostProber {
    transport:   Arc<dyn ProbeTransport>,
    matcher:     FingerprintMatcher,
    /// Requested under each scheme, in order.
    paths:       Vec<String>,
    stream_port: u16,
    timeouts:    ProbeTimeouts,
    model_label: String,
}

impl HostProber {
    pub fn new(transport: Arc<dyn ProbeTransport>, cfg: &ScoutConfig) -> Self {
        HostProber {
            transport,
            matcher:     FingerprintMatcher::new(&cfg.vendor_signatures, cfg.presume_https_root),
            paths:       cfg.fingerprint_paths.clone(),
            stream_port: cfg.stream_port,
            timeouts:    ProbeTimeouts {
                ping:        cfg.ping_timeout,
                fingerprint: cfg.fingerprint_timeout,
                stream:      cfg.stream_timeout,
            },
            model_label: cfg.model_label.clone(),
        }
    }

    /// Decide whether `ip` is a target camera.
    ///
    /// Cancellation is checked before every request; an in-flight request
    /// is allowed to finish.
    pub async fn is_target_device(&self, ip: Ipv4Addr, cancel: &CancelToken) -> Option<MatchReason> {
        for scheme in Scheme::PROBE_ORDER {
            for path in &self.paths {
                if cancel.is_cancelled() {
                    return None;
                }
                let url = format!("{}://{ip}{}", scheme.as_str(), normalize_path(path));
                let Some(reply) = self.transport.http_get(&url, self.timeouts.fingerprint).await else {
                    continue;
                };
                if let Some(reason) = self.matcher.judge(scheme, path, &reply) {
                    return Some(reason);
                }
            }
        }

        if cancel.is_cancelled() {
            return None;
        }
        let stream = SocketAddrV4::new(ip, self.stream_port);
        if self.transport.tcp_connect(stream, self.timeouts.stream).await {
            return Some(MatchReason::StreamPort(self.stream_port));
        }
        None
    }

    /// Label shown for a matched device.
    ///
    /// No model-detection protocol is spoken yet; every match gets the
    /// configured placeholder.
    pub fn model_tag(&self, _ip: Ipv4Addr) -> String {
        self.model_label.clone()
    }
}

#[async_trait]
impl Probe for HostProber {
    async fn probe(&self, ip: Ipv4Addr, cancel: &CancelToken) -> Option<DeviceRecord> {
        if cancel.is_cancelled() {
            return None;
        }
        if !self.transport.ping(ip, self.timeouts.ping).await {
            return None;
        }
        if cancel.is_cancelled() {
            return None;
        }
        debug!("{ip} is reachable, fingerprinting");

        let reason = self.is_target_device(ip, cancel).await?;
        let record = DeviceRecord::online(ip, self.model_tag(ip));
        info!("found camera at {ip} - Model: {} ({reason})", record.display_model);
        Some(record)
    }
}

fn normalize_path(path: &str) -> String {
    if path.is_empty() || path == "/" {
        String::new()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::http::HttpReply;

    /// In-memory network: reachable hosts, canned HTTP replies, open ports.
    #[derive(Default)]
    pub(crate) struct FakeNet {
        pub reachable: Vec<Ipv4Addr>,
        pub replies:   HashMap<String, HttpReply>,
        pub open:      Vec<SocketAddrV4>,
        pub requests:  Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProbeTransport for FakeNet {
        async fn ping(&self, ip: Ipv4Addr, _limit: Duration) -> bool {
            self.requests.lock().unwrap().push(format!("ping {ip}"));
            self.reachable.contains(&ip)
        }

        async fn http_get(&self, url: &str, _limit: Duration) -> Option<HttpReply> {
            self.requests.lock().unwrap().push(format!("GET {url}"));
            self.replies.get(url).cloned()
        }

        async fn tcp_connect(&self, addr: SocketAddrV4, _limit: Duration) -> bool {
            self.requests.lock().unwrap().push(format!("TCP {addr}"));
            self.open.contains(&addr)
        }
    }

    fn prober(net: FakeNet) -> (Arc<FakeNet>, HostProber) {
        let net = Arc::new(net);
        let prober = HostProber::new(net.clone(), &ScoutConfig::default());
        (net, prober)
    }

    const CAM: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);

    #[tokio::test]
    async fn unreachable_host_gets_no_further_work() {
        let (net, prober) = prober(FakeNet::default());
        assert!(prober.probe(CAM, &CancelToken::new()).await.is_none());
        assert_eq!(*net.requests.lock().unwrap(), vec!["ping 192.168.1.50"]);
    }

    #[tokio::test]
    async fn signature_on_https_root_matches() {
        let mut net = FakeNet { reachable: vec![CAM], ..Default::default() };
        net.replies.insert("https://192.168.1.50".into(), HttpReply::new(404, "TP-LINK"));
        let (net, prober) = prober(net);

        let rec = prober.probe(CAM, &CancelToken::new()).await.unwrap();
        assert_eq!(rec.address, CAM);
        assert_eq!(rec.display_model, "Tapo Camera");
        assert_eq!(net.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn http_fallback_and_vendor_paths_are_tried_in_order() {
        let mut net = FakeNet { reachable: vec![CAM], ..Default::default() };
        net.replies.insert(
            "http://192.168.1.50/cgi-bin/luci/web".into(),
            HttpReply::new(200, "<html>tapo</html>"),
        );
        let (net, prober) = prober(net);

        let reason = prober.is_target_device(CAM, &CancelToken::new()).await;
        assert_eq!(reason, Some(MatchReason::Signature("tapo".into())));
        assert_eq!(
            *net.requests.lock().unwrap(),
            vec![
                "GET https://192.168.1.50",
                "GET https://192.168.1.50/stok=/ds",
                "GET https://192.168.1.50/cgi-bin/luci/web",
                "GET http://192.168.1.50",
                "GET http://192.168.1.50/stok=/ds",
                "GET http://192.168.1.50/cgi-bin/luci/web",
            ]
        );
    }

    #[tokio::test]
    async fn stream_port_is_the_last_resort() {
        let net = FakeNet {
            reachable: vec![CAM],
            open: vec![SocketAddrV4::new(CAM, 554)],
            ..Default::default()
        };
        let (net, prober) = prober(net);

        let reason = prober.is_target_device(CAM, &CancelToken::new()).await;
        assert_eq!(reason, Some(MatchReason::StreamPort(554)));
        assert_eq!(net.requests.lock().unwrap().last().unwrap(), "TCP 192.168.1.50:554");
    }

    #[tokio::test]
    async fn silent_host_is_not_found() {
        let (_, prober) = prober(FakeNet { reachable: vec![CAM], ..Default::default() });
        assert!(prober.probe(CAM, &CancelToken::new()).await.is_none());
    }

    #[tokio::test]
    async fn cancelled_probe_does_no_network_work() {
        let (net, prober) = prober(FakeNet { reachable: vec![CAM], ..Default::default() });
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(prober.probe(CAM, &cancel).await.is_none());
        assert!(net.requests.lock().unwrap().is_empty());
    }
}
