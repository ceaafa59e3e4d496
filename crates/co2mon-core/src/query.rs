//! Read-only JSON view of the reading log
//!
//! A request whose target starts with `/json` is answered with the newest
//! `n` readings:
//!
//! ```text
//! GET /json?n=2 HTTP/1.1      (dashboards also send /json&n=2)
//!
//! [{"timestamp":"1700000000","co2":"412.5"},{"timestamp":"1700000002","co2":"415.1"}]
//! ```
//!
//! Values are sent as decimal strings. A missing, malformed or non-positive
//! `n` means 1, and a log that cannot be read yields `[]`; the service never
//! answers a `/json` request with an error.

use core::fmt::Display;

use embassy_sync::blocking_mutex::raw::RawMutex;
use log::{debug, error, warn};
use serde::ser::{Serialize, SerializeStruct, Serializer};

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;

use crate::storage::{LogBackend, LogStore, Reading};

pub const JSON_PATH: &str = "/json";
pub const DEFAULT_COUNT: i32 = 1;

/// What a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The newest `count` readings, `count >= 1`
    Json { count: i32 },
    NotFound,
}

/// Route a raw request. Only the first line is inspected.
///
/// Accepts a full request line (`GET /json?n=5 HTTP/1.1`) or a bare target
/// (`/json&n=5`).
pub fn parse_request(request: &[u8]) -> Route {
    let first_line = request.split(|b| *b == b'\n').next().unwrap_or_default();
    let Ok(first_line) = core::str::from_utf8(first_line) else {
        return Route::NotFound;
    };

    let mut tokens = first_line.split_whitespace();
    let target = match tokens.next() {
        Some(token) if token.starts_with('/') => token,
        Some(_) => tokens.next().unwrap_or_default(),
        None => return Route::NotFound,
    };

    let Some(params) = target.strip_prefix(JSON_PATH) else {
        return Route::NotFound;
    };
    if !(params.is_empty() || params.starts_with(['?', '&'])) {
        return Route::NotFound;
    }

    Route::Json {
        count: parse_count(params),
    }
}

/// Extract `n` from a `?`/`&` separated parameter list.
fn parse_count(params: &str) -> i32 {
    params
        .split(['?', '&'])
        .find_map(|param| param.strip_prefix("n="))
        .and_then(|value| value.parse::<i32>().ok())
        .filter(|count| *count > 0)
        .unwrap_or(DEFAULT_COUNT)
}

/// Serializes a value through its `Display` form as a JSON string.
struct AsText<T>(T);

impl<T: Display> Serialize for AsText<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

struct JsonRecord<'a>(&'a Reading);

impl Serialize for JsonRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut record = serializer.serialize_struct("Reading", 2)?;
        record.serialize_field("timestamp", &AsText(self.0.timestamp))?;
        record.serialize_field("co2", &AsText(self.0.concentration))?;
        record.end()
    }
}

/// Render readings as a JSON array of `{"timestamp", "co2"}` string pairs,
/// in the order given.
pub fn render_records(readings: &[Reading]) -> String {
    let records: Vec<JsonRecord<'_>> = readings.iter().map(JsonRecord).collect();
    serde_json::to_string(&records).unwrap_or_else(|e| {
        error!("Failed to serialize readings: {:?}", e);
        String::from("[]")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotFound,
}

impl Status {
    pub const fn line(self) -> &'static str {
        match self {
            Self::Ok => "200 OK",
            Self::NotFound => "404 Not Found",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub body: String,
}

impl Response {
    pub fn json(body: String) -> Self {
        Self {
            status: Status::Ok,
            body,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            body: String::new(),
        }
    }

    /// Full HTTP/1.1 response: status line, headers and body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let content_type = match self.status {
            Status::Ok => "Content-Type: application/json\r\n",
            Status::NotFound => "",
        };
        let head = alloc::format!(
            "HTTP/1.1 {}\r\n{}Access-Control-Allow-Origin: *\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status.line(),
            content_type,
            self.body.len()
        );

        let mut bytes = Vec::with_capacity(head.len() + self.body.len());
        bytes.extend_from_slice(head.as_bytes());
        bytes.extend_from_slice(self.body.as_bytes());
        bytes
    }
}

/// Answer one request against the log.
///
/// Holds the store lock only for the single read; never fails.
pub async fn handle_request<M, B>(store: &LogStore<M, B>, request: &[u8]) -> Response
where
    M: RawMutex,
    B: LogBackend,
{
    let Route::Json { count } = parse_request(request) else {
        debug!("Query for unknown path");
        return Response::not_found();
    };

    let readings = match store.read_recent(count).await {
        Ok(readings) => readings,
        Err(e) => {
            warn!("Query could not read log, answering empty: {:?}", e);
            Vec::new()
        }
    };

    debug!("Query n={} -> {} readings", count, readings.len());
    Response::json(render_records(&readings))
}
