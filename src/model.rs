//! Records produced by a network scan.

use std::fmt;
use std::net::Ipv4Addr;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::util::SubnetPrefix;

/// Reachability state of a discovered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceStatus {
    Online,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Online => f.write_str("Online"),
        }
    }
}

/// One camera found by a host probe. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRecord {
    pub address:       Ipv4Addr,
    pub display_model: String,
    pub status:        DeviceStatus,
    pub last_seen:     DateTime<Local>,
}

impl DeviceRecord {
    pub fn online(address: Ipv4Addr, display_model: impl Into<String>) -> Self {
        DeviceRecord {
            address,
            display_model: display_model.into(),
            status:        DeviceStatus::Online,
            last_seen:     Local::now(),
        }
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<15} {:<20} {:<7} {}",
            self.address,
            self.display_model,
            self.status,
            self.last_seen.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// How a scan ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ScanStatus {
    Completed,
    Cancelled,
    Failed(String),
}

/// Final summary of one scan, emitted after every probe task has settled.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scan_id:  String,
    #[serde(serialize_with = "serialize_prefix")]
    pub prefix:   SubnetPrefix,
    pub status:   ScanStatus,
    pub devices:  Vec<DeviceRecord>,
    /// Probes that made it past the concurrency gate.
    pub admitted: usize,
}

impl ScanReport {
    /// One-line status text for the operator.
    pub fn summary(&self) -> String {
        match &self.status {
            ScanStatus::Completed => {
                format!("Scan complete - Found {} camera(s)", self.devices.len())
            }
            ScanStatus::Cancelled => "Scan cancelled".to_string(),
            ScanStatus::Failed(reason) => format!("Scan failed: {reason}"),
        }
    }
}

fn serialize_prefix<S: serde::Serializer>(p: &SubnetPrefix, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(p)
}

/// Live notifications emitted while a scan runs.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    DeviceFound(DeviceRecord),
    Finished(ScanReport),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(status: ScanStatus, n: u8) -> ScanReport {
        ScanReport {
            scan_id:  "t".into(),
            prefix:   SubnetPrefix([192, 168, 1]),
            status,
            devices:  (1..=n)
                .map(|i| DeviceRecord::online(Ipv4Addr::new(192, 168, 1, i), "Tapo Camera"))
                .collect(),
            admitted: 254,
        }
    }

    #[test]
    fn summary_distinguishes_outcomes() {
        assert_eq!(report(ScanStatus::Completed, 0).summary(), "Scan complete - Found 0 camera(s)");
        assert_eq!(report(ScanStatus::Completed, 2).summary(), "Scan complete - Found 2 camera(s)");
        assert_eq!(report(ScanStatus::Cancelled, 1).summary(), "Scan cancelled");
        assert!(report(ScanStatus::Failed("boom".into()), 0).summary().contains("boom"));
    }

    #[test]
    fn report_serializes_prefix_as_text() {
        let json = serde_json::to_value(report(ScanStatus::Completed, 1)).unwrap();
        assert_eq!(json["prefix"], "192.168.1");
        assert_eq!(json["devices"][0]["status"], "Online");
        assert_eq!(json["devices"][0]["address"], "192.168.1.1");
    }
}
