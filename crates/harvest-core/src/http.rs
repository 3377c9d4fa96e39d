//! Blocking HTTP client for fetchers.
//!
//! Uses async reqwest on a private current-thread tokio runtime and presents a
//! sync interface, so each worker thread owns its own client and runtime and
//! nothing is shared across workers.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde_json::Value;

use crate::error::FetchError;

/// Connection settings shared by every client of a run.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            user_agent: concat!("harvest/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Map a transport-level reqwest error to a fetch class.
pub fn classify_reqwest(e: &reqwest::Error) -> FetchError {
    if let Some(status) = e.status() {
        return classify_status(status.as_u16(), &e.to_string());
    }
    if e.is_builder() {
        FetchError::Fatal(e.to_string())
    } else if e.is_decode() {
        FetchError::Permanent(e.to_string())
    } else {
        // timeout, connect, request, body: network class
        FetchError::Transient(e.to_string())
    }
}

/// Map a non-success HTTP status to a fetch class.
pub fn classify_status(status: u16, message: &str) -> FetchError {
    let msg = format!("HTTP {status}: {message}");
    match status {
        408 | 425 | 429 | 500..=599 => FetchError::Transient(msg),
        401 => FetchError::Fatal(msg),
        _ => FetchError::Permanent(msg),
    }
}

/// Sync facade over one reqwest client and its runtime.
pub struct HttpClient {
    runtime: tokio::runtime::Runtime,
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(settings: &HttpSettings) -> Result<Self, FetchError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| FetchError::Fatal(format!("tokio runtime: {e}")))?;
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Fatal(format!("HTTP client: {e}")))?;
        Ok(Self { runtime, client })
    }

    /// GET a JSON document. Returns the parsed body and its size in bytes.
    pub fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<(Value, u64), FetchError> {
        self.runtime.block_on(async {
            let resp = self
                .client
                .get(url)
                .query(query)
                .send()
                .await
                .map_err(|e| classify_reqwest(&e))?;
            read_json(resp).await
        })
    }

    /// POST a JSON body with extra headers, returning the parsed JSON response.
    pub fn post_json(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &Value,
    ) -> Result<(Value, u64), FetchError> {
        let bytes = serde_json::to_vec(body).map_err(|e| FetchError::Fatal(e.to_string()))?;
        self.runtime.block_on(async {
            let mut req = self
                .client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(bytes);
            for (name, value) in headers {
                req = req.header(*name, value.as_str());
            }
            let resp = req.send().await.map_err(|e| classify_reqwest(&e))?;
            read_json(resp).await
        })
    }

    /// Stream a response body to `dest` via `dest.tmp` + rename.
    ///
    /// Returns the number of bytes written. A failed transfer removes the
    /// temp file so `dest` only ever exists complete.
    pub fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let tmp = dest.with_extension(match dest.extension() {
            Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
            None => "tmp".to_string(),
        });
        let result = self.runtime.block_on(async {
            let mut resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| classify_reqwest(&e))?;
            check_status(&resp)?;

            let mut file = File::create(&tmp).map_err(io_fatal)?;
            let mut written = 0u64;
            while let Some(chunk) = resp.chunk().await.map_err(|e| classify_reqwest(&e))? {
                file.write_all(&chunk).map_err(io_fatal)?;
                written += chunk.len() as u64;
            }
            file.sync_all().map_err(io_fatal)?;
            Ok(written)
        });

        match result {
            Ok(written) => {
                fs::rename(&tmp, dest).map_err(io_fatal)?;
                Ok(written)
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(e)
            }
        }
    }
}

/// Local disk failures stop the run.
fn io_fatal(e: std::io::Error) -> FetchError {
    FetchError::Fatal(format!("IO: {e}"))
}

fn check_status(resp: &reqwest::Response) -> Result<(), FetchError> {
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(classify_status(
            status.as_u16(),
            status.canonical_reason().unwrap_or("unexpected status"),
        ))
    }
}

async fn read_json(resp: reqwest::Response) -> Result<(Value, u64), FetchError> {
    check_status(&resp)?;
    let body = resp.bytes().await.map_err(|e| classify_reqwest(&e))?;
    let value = serde_json::from_slice(&body)
        .map_err(|e| FetchError::Permanent(format!("invalid JSON: {e}")))?;
    Ok((value, body.len() as u64))
}
