//! Text recognition on captured frames.
//!
//! Backends sit behind [`OcrProcessor`]; which one runs is a configuration
//! choice made once by [`make_ocr`]. Log lines and recognised text are pushed
//! to sinks injected by the caller.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use log::{debug, warn};
use reqwest::multipart::Form;
use reqwest::Client;
use serde_json::Value;

use crate::config::{OcrBackend, ScoutConfig};
use crate::error::{Result, ScoutError};
use crate::http::HttpReply;

pub const OCR_SPACE_URL: &str = "https://api.ocr.space/parse/image";

const CLOUD_TIMEOUT: Duration = Duration::from_secs(30);

/// Engine 2 handles mixed-font overlay text best.
const CLOUD_ENGINE: &str = "2";

/// Callback receiving one line of text.
pub type TextSink = Box<dyn Fn(&str) + Send + Sync>;

#[async_trait]
pub trait OcrProcessor: Send + Sync {
    /// Prepare the backend. `false` means it cannot be used.
    fn initialize(&mut self) -> bool;

    /// Recognise text in a PNG-encoded frame. An empty string means nothing
    /// was read.
    async fn process_frame(&self, png: &[u8]) -> Result<String>;

    fn set_log_sink(&mut self, sink: TextSink);

    fn set_result_sink(&mut self, sink: TextSink);
}

/// Pick the backend named in `cfg`.
pub fn make_ocr(cfg: &ScoutConfig) -> Result<Box<dyn OcrProcessor>> {
    let ocr: Box<dyn OcrProcessor> = match cfg.ocr_backend {
        OcrBackend::None  => Box::new(NullOcr::default()),
        OcrBackend::Cloud => Box::new(CloudOcr::new(&cfg.ocr_api_key)?),
    };
    Ok(ocr)
}

#[derive(Default)]
struct Sinks {
    log:    Option<TextSink>,
    result: Option<TextSink>,
}

impl Sinks {
    fn log(&self, line: &str) {
        debug!("ocr: {line}");
        if let Some(sink) = &self.log {
            sink(line);
        }
    }

    fn result(&self, text: &str) {
        if let Some(sink) = &self.result {
            sink(text);
        }
    }
}

// ── OCR.space ─────────────────────────────────────────────────────────────────

/// OCR.space HTTP API client.
pub struct CloudOcr {
    http:     Client,
    endpoint: String,
    api_key:  String,
    sinks:    Sinks,
}

impl CloudOcr {
    pub fn new(api_key: &str) -> Result<Self> {
        let http = Client::builder().timeout(CLOUD_TIMEOUT).build()?;
        Ok(CloudOcr {
            http,
            endpoint: OCR_SPACE_URL.to_string(),
            api_key:  api_key.to_string(),
            sinks:    Sinks::default(),
        })
    }

    fn form(&self, png: &[u8]) -> Form {
        Form::new()
            .text("apikey", self.api_key.clone())
            .text("OCREngine", CLOUD_ENGINE)
            .text("detectOrientation", "true")
            .text("scale", "true")
            .text("base64Image", format!("data:image/png;base64,{}", B64.encode(png)))
    }

    /// Turn a service reply into recognised text, reporting through the sinks.
    fn handle_reply(&self, reply: &HttpReply) -> Result<String> {
        if !reply.is_success() {
            let msg = format!("OCR API returned HTTP {}", reply.status);
            self.sinks.log(&msg);
            return Err(ScoutError::Ocr(msg));
        }
        match parse_ocr_space(&reply.body)? {
            OcrOutcome::Text(text) => {
                self.sinks.log(&format!("Cloud OCR detected: {}", text.replace('\n', " | ")));
                self.sinks.result(&text);
                Ok(text)
            }
            OcrOutcome::ApiError(msg) => {
                self.sinks.log(&format!("OCR API error: {msg}"));
                Err(ScoutError::Ocr(msg))
            }
            OcrOutcome::Empty => Ok(String::new()),
        }
    }
}

#[async_trait]
impl OcrProcessor for CloudOcr {
    fn initialize(&mut self) -> bool {
        if self.api_key.is_empty() {
            self.sinks.log("Cloud OCR unavailable: no API key configured");
            return false;
        }
        self.sinks.log("Cloud OCR processor initialized (OCR.space API)");
        true
    }

    async fn process_frame(&self, png: &[u8]) -> Result<String> {
        let resp = match self.http.post(&self.endpoint).multipart(self.form(png)).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("cloud OCR request failed: {e}");
                self.sinks.log(&format!("Cloud OCR error: {e}"));
                return Err(e.into());
            }
        };
        let reply = HttpReply::read(resp).await?;
        self.handle_reply(&reply)
    }

    fn set_log_sink(&mut self, sink: TextSink) {
        self.sinks.log = Some(sink);
    }

    fn set_result_sink(&mut self, sink: TextSink) {
        self.sinks.result = Some(sink);
    }
}

/// What an OCR.space reply carried.
#[derive(Debug, PartialEq, Eq)]
pub enum OcrOutcome {
    Text(String),
    ApiError(String),
    Empty,
}

/// Read `ParsedResults[0].ParsedText`, falling back to `ErrorMessage`.
///
/// `ErrorMessage` is either a string or an array of strings.
pub fn parse_ocr_space(body: &str) -> Result<OcrOutcome> {
    let root: Value = serde_json::from_str(body)?;

    let text = root
        .get("ParsedResults")
        .and_then(|r| r.get(0))
        .and_then(|r| r.get("ParsedText"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if !text.is_empty() {
        return Ok(OcrOutcome::Text(text.to_string()));
    }

    let error = match root.get("ErrorMessage") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("; "),
        _ => String::new(),
    };
    if error.is_empty() || error == "null" {
        Ok(OcrOutcome::Empty)
    } else {
        Ok(OcrOutcome::ApiError(error))
    }
}

// ── Disabled backend ──────────────────────────────────────────────────────────

/// Backend used when OCR is turned off. Never reads anything.
#[derive(Default)]
pub struct NullOcr {
    sinks: Sinks,
}

#[async_trait]
impl OcrProcessor for NullOcr {
    fn initialize(&mut self) -> bool {
        self.sinks.log("OCR disabled");
        true
    }

    async fn process_frame(&self, _png: &[u8]) -> Result<String> {
        Ok(String::new())
    }

    fn set_log_sink(&mut self, sink: TextSink) {
        self.sinks.log = Some(sink);
    }

    fn set_result_sink(&mut self, sink: TextSink) {
        self.sinks.result = Some(sink);
    }
}
