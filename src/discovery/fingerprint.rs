//! Vendor fingerprinting from HTTP responses.
//!
//! A host is declared a target camera when any of these hold:
//!   - a response body contains one of the vendor signatures (case-insensitive)
//!   - the HTTPS root answers 2xx or 401 (`presume_https_root`, weak on purpose)
//!   - the streaming port accepts a TCP connection (last resort, decided by the prober)

use std::fmt;

use crate::http::HttpReply;

/// URL scheme used for a fingerprint request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Https,
    Http,
}

impl Scheme {
    /// Probe order: HTTPS first, plain HTTP as fallback.
    pub const PROBE_ORDER: [Scheme; 2] = [Scheme::Https, Scheme::Http];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Https => "https",
            Scheme::Http  => "http",
        }
    }
}

/// Why a host was accepted as a camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchReason {
    Signature(String),
    HttpsRoot(u16),
    StreamPort(u16),
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchReason::Signature(s)  => write!(f, "signature {s:?}"),
            MatchReason::HttpsRoot(st) => write!(f, "HTTPS root answered {st}"),
            MatchReason::StreamPort(p) => write!(f, "stream port {p} open"),
        }
    }
}

/// Decides whether an HTTP response identifies the target vendor.
#[derive(Debug, Clone)]
pub struct FingerprintMatcher {
    /// Lower-cased signatures.
    signatures:         Vec<String>,
    presume_https_root: bool,
}

impl FingerprintMatcher {
    pub fn new<S: AsRef<str>>(signatures: &[S], presume_https_root: bool) -> Self {
        FingerprintMatcher {
            signatures: signatures
                .iter()
                .map(|s| s.as_ref().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            presume_https_root,
        }
    }

    /// First signature found in `body`, if any.
    pub fn find_signature(&self, body: &str) -> Option<&str> {
        let body = body.to_ascii_lowercase();
        self.signatures
            .iter()
            .find(|sig| body.contains(sig.as_str()))
            .map(String::as_str)
    }

    /// The "any embedded web server on HTTPS is a camera" heuristic.
    ///
    /// Deliberately permissive: it will also accept routers, printers and
    /// NAS boxes that serve HTTPS. Disable with `presume_https_root = false`.
    pub fn presumes_camera(&self, status: u16) -> bool {
        self.presume_https_root && ((200..300).contains(&status) || status == 401)
    }

    /// Judge one response fetched from `scheme://host{path}`.
    pub fn judge(&self, scheme: Scheme, path: &str, reply: &HttpReply) -> Option<MatchReason> {
        if let Some(sig) = self.find_signature(&reply.body) {
            return Some(MatchReason::Signature(sig.to_string()));
        }
        if scheme == Scheme::Https && is_root(path) && self.presumes_camera(reply.status) {
            return Some(MatchReason::HttpsRoot(reply.status));
        }
        None
    }
}

fn is_root(path: &str) -> bool {
    path.is_empty() || path == "/"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(presume: bool) -> FingerprintMatcher {
        FingerprintMatcher::new(&["tapo", "TP-LINK", "smart.ipcamera"], presume)
    }

    #[test]
    fn signature_is_case_insensitive() {
        let m = matcher(false);
        let reply = HttpReply::new(404, "<title>Tp-Link Web</title>");
        assert_eq!(
            m.judge(Scheme::Http, "/cgi-bin/luci/web", &reply),
            Some(MatchReason::Signature("tp-link".into()))
        );
        assert_eq!(m.find_signature("device_type: SMART.IPCAMERA"), Some("smart.ipcamera"));
        assert_eq!(m.find_signature("nothing here"), None);
    }

    #[test]
    fn https_root_heuristic_only_applies_to_https_root() {
        let m = matcher(true);
        let ok = HttpReply::new(200, "");
        let unauth = HttpReply::new(401, "");
        let missing = HttpReply::new(404, "");

        assert_eq!(m.judge(Scheme::Https, "/", &ok), Some(MatchReason::HttpsRoot(200)));
        assert_eq!(m.judge(Scheme::Https, "", &unauth), Some(MatchReason::HttpsRoot(401)));
        assert_eq!(m.judge(Scheme::Https, "/", &missing), None);
        assert_eq!(m.judge(Scheme::Http, "/", &ok), None);
        assert_eq!(m.judge(Scheme::Https, "/stok=/ds", &ok), None);
    }

    #[test]
    fn https_root_heuristic_can_be_disabled() {
        let m = matcher(false);
        assert_eq!(m.judge(Scheme::Https, "/", &HttpReply::new(200, "")), None);
        assert!(!m.presumes_camera(401));
    }
}
