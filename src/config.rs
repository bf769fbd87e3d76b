//! ptz-scout configuration file parser.
//!
//! Flat `key = value` format, one option per line, `#` starts a comment.

use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, ScoutError};
use crate::ptz::endpoint::EndpointTemplate;
use crate::ptz::Protocol;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ptz-scout/ptz-scout.conf";

// Defaults (milliseconds unless noted)
const SCAN_CONCURRENCY:    usize = 100;
const PING_TIMEOUT:        u64 = 200;
const FINGERPRINT_TIMEOUT: u64 = 800;
const STREAM_PORT:         u16 = 554;
const STREAM_TIMEOUT:      u64 = 500;
const ONVIF_TIMEOUT:       u64 = 5_000;
const TAPO_TIMEOUT:        u64 = 10_000;

const DEFAULT_SIGNATURES: &[&str] = &["tapo", "tp-link", "smart.ipcamera"];
const DEFAULT_FINGERPRINT_PATHS: &[&str] = &["/", "/stok=/ds", "/cgi-bin/luci/web"];

const DEFAULT_ONVIF_CONNECT: &[&str] = &[
    "http:2020/onvif/device_service",
    "http:8000/onvif/device_service",
    "http:8080/onvif/device_service",
    "http:80/onvif/device_service",
    "https:443/onvif/device_service",
];

const DEFAULT_ONVIF_PTZ: &[&str] = &[
    "http:2020/onvif/ptz_service",
    "http:2020/onvif/service",
    "http:8000/onvif/ptz_service",
    "http:80/onvif/ptz_service",
    "http:80/onvif/ptz",
    "https:443/onvif/ptz_service",
];

/// OCR backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrBackend {
    None,
    Cloud,
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct ScoutConfig {
    // ── Camera credentials ────────────────────────────────────────────────────
    pub username: String,
    pub password: String,
    /// Protocol used when a device is selected without an explicit choice.
    pub protocol: Protocol,
    // ── Discovery ─────────────────────────────────────────────────────────────
    /// Subnet prefix to scan (`192.168.1`); empty means auto-detect.
    pub subnet: String,
    pub scan_concurrency: usize,
    pub ping_timeout: Duration,
    pub fingerprint_timeout: Duration,
    pub stream_port: u16,
    pub stream_timeout: Duration,
    /// Case-insensitive body substrings identifying the target vendor.
    pub vendor_signatures: Vec<String>,
    /// Paths requested on each host during fingerprinting, root first.
    pub fingerprint_paths: Vec<String>,
    /// Treat a 2xx/401 on the HTTPS root as a camera.
    pub presume_https_root: bool,
    /// Label stamped on every discovered device.
    pub model_label: String,
    // ── PTZ ───────────────────────────────────────────────────────────────────
    pub onvif_timeout: Duration,
    pub tapo_timeout: Duration,
    pub tapo_scheme: String,
    pub onvif_profile_token: String,
    /// Candidates for the `GetDeviceInformation` reachability probe.
    pub onvif_connect_endpoints: Vec<EndpointTemplate>,
    /// Candidates for PTZ service commands.
    pub onvif_ptz_endpoints: Vec<EndpointTemplate>,
    // ── OCR ───────────────────────────────────────────────────────────────────
    pub ocr_backend: OcrBackend,
    pub ocr_api_key: String,
    // ── Process ───────────────────────────────────────────────────────────────
    pub log_syslog: bool,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            username:                "admin".to_string(),
            password:                String::new(),
            protocol:                Protocol::Tapo,
            subnet:                  String::new(),
            scan_concurrency:        SCAN_CONCURRENCY,
            ping_timeout:            Duration::from_millis(PING_TIMEOUT),
            fingerprint_timeout:     Duration::from_millis(FINGERPRINT_TIMEOUT),
            stream_port:             STREAM_PORT,
            stream_timeout:          Duration::from_millis(STREAM_TIMEOUT),
            vendor_signatures:       to_strings(DEFAULT_SIGNATURES),
            fingerprint_paths:       to_strings(DEFAULT_FINGERPRINT_PATHS),
            presume_https_root:      true,
            model_label:             "Tapo Camera".to_string(),
            onvif_timeout:           Duration::from_millis(ONVIF_TIMEOUT),
            tapo_timeout:            Duration::from_millis(TAPO_TIMEOUT),
            tapo_scheme:             "https".to_string(),
            onvif_profile_token:     "profile_1".to_string(),
            onvif_connect_endpoints: default_endpoints(DEFAULT_ONVIF_CONNECT),
            onvif_ptz_endpoints:     default_endpoints(DEFAULT_ONVIF_PTZ),
            ocr_backend:             OcrBackend::None,
            ocr_api_key:             String::new(),
            log_syslog:              false,
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_endpoints(items: &[&str]) -> Vec<EndpointTemplate> {
    items
        .iter()
        .filter_map(|s| EndpointTemplate::parse(s).ok())
        .collect()
}

fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(val: &str) -> bool {
    matches!(val.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_millis(val: &str, default: u64) -> Duration {
    Duration::from_millis(val.parse().unwrap_or(default))
}

fn parse_endpoints(key: &str, val: &str) -> Result<Vec<EndpointTemplate>> {
    parse_list(val)
        .iter()
        .map(|s| {
            EndpointTemplate::parse(s)
                .map_err(|e| ScoutError::Config(format!("{key}: {e}")))
        })
        .collect()
}

/// Load the configuration at `path`.
///
/// When `path` is the default location and the file does not exist, the
/// built-in defaults are returned. A missing file anywhere else is an error.
pub fn load_config(path: &Path) -> Result<ScoutConfig> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
        return Ok(ScoutConfig::default());
    }
    let content = fs::read_to_string(path)
        .map_err(|e| ScoutError::Config(format!("cannot read {}: {e}", path.display())))?;
    parse_config(&content)
}

/// Parse configuration text in `key = value` form.
pub fn parse_config(content: &str) -> Result<ScoutConfig> {
    let mut cfg = ScoutConfig::default();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, '=');
        let key = match parts.next() {
            Some(k) => k.trim().to_ascii_lowercase(),
            None => continue,
        };
        let val = match parts.next() {
            Some(v) => v.trim().to_string(),
            None => continue,
        };
        if val.is_empty() {
            continue;
        }

        match key.as_str() {
            "username"               => cfg.username            = val,
            "password"               => cfg.password            = val,
            "protocol"               => cfg.protocol            = val.parse()?,
            "subnet"                 => cfg.subnet              = val,
            "scan_concurrency"       => cfg.scan_concurrency    = val.parse().unwrap_or(SCAN_CONCURRENCY),
            "ping_timeout_ms"        => cfg.ping_timeout        = parse_millis(&val, PING_TIMEOUT),
            "fingerprint_timeout_ms" => cfg.fingerprint_timeout = parse_millis(&val, FINGERPRINT_TIMEOUT),
            "stream_port"            => cfg.stream_port         = val.parse().unwrap_or(STREAM_PORT),
            "stream_timeout_ms"      => cfg.stream_timeout      = parse_millis(&val, STREAM_TIMEOUT),
            "vendor_signatures"      => cfg.vendor_signatures   = parse_list(&val),
            "fingerprint_paths"      => cfg.fingerprint_paths   = parse_list(&val),
            "presume_https_root"     => cfg.presume_https_root  = parse_bool(&val),
            "model_label"            => cfg.model_label         = val,
            "onvif_timeout_ms"       => cfg.onvif_timeout       = parse_millis(&val, ONVIF_TIMEOUT),
            "tapo_timeout_ms"        => cfg.tapo_timeout        = parse_millis(&val, TAPO_TIMEOUT),
            "tapo_scheme"            => cfg.tapo_scheme         = val.to_ascii_lowercase(),
            "onvif_profile_token"    => cfg.onvif_profile_token = val,
            "onvif_connect_endpoints" => {
                cfg.onvif_connect_endpoints = parse_endpoints(&key, &val)?;
            }
            "onvif_ptz_endpoints" => {
                cfg.onvif_ptz_endpoints = parse_endpoints(&key, &val)?;
            }
            "ocr_backend" => {
                cfg.ocr_backend = match val.to_ascii_lowercase().as_str() {
                    "cloud" => OcrBackend::Cloud,
                    _       => OcrBackend::None,
                };
            }
            "ocr_api_key"            => cfg.ocr_api_key         = val,
            "log_syslog"             => cfg.log_syslog          = parse_bool(&val),
            _ => {} // ignore unknown keys
        }
    }

    Ok(cfg)
}

/// Validate that the configuration can drive a scan and a PTZ session.
pub fn validate_config(cfg: &ScoutConfig) -> Result<()> {
    if cfg.scan_concurrency == 0 || cfg.scan_concurrency > 254 {
        return Err(ScoutError::Config(format!(
            "scan_concurrency must be within 1..=254 (got {})",
            cfg.scan_concurrency
        )));
    }
    let timeouts = [
        ("ping_timeout_ms",        cfg.ping_timeout),
        ("fingerprint_timeout_ms", cfg.fingerprint_timeout),
        ("stream_timeout_ms",      cfg.stream_timeout),
        ("onvif_timeout_ms",       cfg.onvif_timeout),
        ("tapo_timeout_ms",        cfg.tapo_timeout),
    ];
    for (name, value) in timeouts {
        if value.is_zero() {
            return Err(ScoutError::Config(format!("{name} must be non-zero")));
        }
    }
    if cfg.onvif_connect_endpoints.is_empty() {
        return Err(ScoutError::Config("onvif_connect_endpoints is empty".into()));
    }
    if cfg.onvif_ptz_endpoints.is_empty() {
        return Err(ScoutError::Config("onvif_ptz_endpoints is empty".into()));
    }
    if cfg.tapo_scheme != "https" && cfg.tapo_scheme != "http" {
        return Err(ScoutError::Config(format!(
            "tapo_scheme must be http or https (got {})",
            cfg.tapo_scheme
        )));
    }
    if cfg.ocr_backend == OcrBackend::Cloud && cfg.ocr_api_key.is_empty() {
        return Err(ScoutError::Config("ocr_api_key is required for the cloud OCR backend".into()));
    }
    Ok(())
}
