//! Endpoint templates for the ONVIF fallback chains.
//!
//! Written in config as `scheme:port/path`, e.g. `http:2020/onvif/ptz_service`.

use std::fmt;
use std::str::FromStr;

use crate::error::ScoutError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointTemplate {
    pub scheme: String,
    pub port:   u16,
    pub path:   String,
}

impl EndpointTemplate {
    pub fn new(scheme: &str, port: u16, path: &str) -> Self {
        EndpointTemplate {
            scheme: scheme.to_string(),
            port,
            path:   path.to_string(),
        }
    }

    pub fn parse(s: &str) -> Result<Self, ScoutError> {
        s.parse()
    }

    /// Full URL for `host`. The port is always written out.
    pub fn render(&self, host: &str) -> String {
        format!("{}://{host}:{}{}", self.scheme, self.port, self.path)
    }
}

impl FromStr for EndpointTemplate {
    type Err = ScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bad = |why: &str| ScoutError::Config(format!("endpoint {s:?}: {why}"));

        let (scheme, rest) = s.split_once(':').ok_or_else(|| bad("expected scheme:port/path"))?;
        let scheme = scheme.to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(bad("scheme must be http or https"));
        }
        let (port, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        let port: u16 = port.parse().map_err(|_| bad("invalid port"))?;
        if port == 0 {
            return Err(bad("port must be non-zero"));
        }
        Ok(EndpointTemplate { scheme, port, path: path.to_string() })
    }
}

impl fmt::Display for EndpointTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.scheme, self.port, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render() {
        let ep: EndpointTemplate = "HTTPS:443/onvif/ptz_service".parse().unwrap();
        assert_eq!(ep, EndpointTemplate::new("https", 443, "/onvif/ptz_service"));
        assert_eq!(ep.render("10.1.1.4"), "https://10.1.1.4:443/onvif/ptz_service");
        assert_eq!(ep.to_string(), "https:443/onvif/ptz_service");

        let bare: EndpointTemplate = "http:8000".parse().unwrap();
        assert_eq!(bare.render("cam"), "http://cam:8000/");
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "http", "ftp:21/x", "http:notaport/x", "http:0/x", "http:70000/x"] {
            assert!(bad.parse::<EndpointTemplate>().is_err(), "{bad}");
        }
    }
}
