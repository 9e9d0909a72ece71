//! Access log in Common Log Format.
//!
//! One file per panel start, named after the local date:
//! `<log_directory>/access-YYYY-MM-DD.log`.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Local};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Append-only access log file.
#[derive(Debug)]
pub struct AccessLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl AccessLog {
    /// Open (or create) today's log file inside `dir`. The directory must exist.
    pub async fn open(dir: &Path) -> io::Result<Self> {
        let path = dir.join(file_name(Local::now()));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line.
    pub async fn write_line(&self, line: &str) -> io::Result<()> {
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await
    }
}

pub fn file_name(now: DateTime<Local>) -> String {
    format!("access-{}.log", now.format("%Y-%m-%d"))
}

/// Fields of one access log entry.
#[derive(Debug, Clone)]
pub struct AccessEntry {
    pub remote: Option<SocketAddr>,
    pub at: DateTime<Local>,
    pub method: String,
    pub target: String,
    pub version: String,
    pub status: u16,
    pub bytes: Option<u64>,
}

impl AccessEntry {
    /// `host ident authuser [date] "request" status bytes`
    pub fn to_clf(&self) -> String {
        let host = self
            .remote
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "-".to_string());
        let bytes = self
            .bytes
            .map(|b| b.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "{} - - [{}] \"{} {} {}\" {} {}",
            host,
            self.at.format("%d/%b/%Y:%H:%M:%S %z"),
            self.method,
            self.target,
            self.version,
            self.status,
            bytes
        )
    }
}

/// Middleware writing one line per request.
pub async fn record_access(
    State(log): State<Arc<AccessLog>>,
    request: Request,
    next: Next,
) -> Response {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let method = request.method().to_string();
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let version = format!("{:?}", request.version());
    let at = Local::now();

    let response = next.run(request).await;

    let bytes = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    let entry = AccessEntry {
        remote,
        at,
        method,
        target,
        version,
        status: response.status().as_u16(),
        bytes,
    };
    if let Err(e) = log.write_line(&entry.to_clf()).await {
        tracing::warn!(path = %log.path().display(), error = %e, "Failed to write access log");
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_file_name_uses_local_date() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(file_name(at), "access-2024-03-09.log");
    }

    #[test]
    fn test_common_log_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 13, 55, 36).unwrap();
        let entry = AccessEntry {
            remote: Some("127.0.0.1:50000".parse().unwrap()),
            at,
            method: "GET".into(),
            target: "/api/status?x=1".into(),
            version: "HTTP/1.1".into(),
            status: 200,
            bytes: Some(42),
        };
        let line = entry.to_clf();
        assert!(line.starts_with("127.0.0.1 - - [09/Mar/2024:13:55:36 "));
        assert!(line.ends_with("] \"GET /api/status?x=1 HTTP/1.1\" 200 42"));
    }

    #[test]
    fn test_unknown_fields_are_dashes() {
        let entry = AccessEntry {
            remote: None,
            at: Local::now(),
            method: "POST".into(),
            target: "/".into(),
            version: "HTTP/1.1".into(),
            status: 404,
            bytes: None,
        };
        let line = entry.to_clf();
        assert!(line.starts_with("- - - ["));
        assert!(line.ends_with(" 404 -"));
    }

    #[tokio::test]
    async fn test_open_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let log = AccessLog::open(dir.path()).await.unwrap();
        log.write_line("first").await.unwrap();
        log.write_line("second").await.unwrap();

        let contents = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }
}
