/*!
api.rs - thin HTTP client for the remote build service.

Owns the reqwest client, the service base URL and the credential, and the
per-endpoint timeout policy:

  GET  /openapi.json                30s   schema discovery
  POST {group}/{command}           180s   command execution
  POST /agitransfer/zip-directory   60s   server-side archive build
  POST /agitransfer/upload-file     60s   per-file upload
  GET  <signed url>                180s   archive download (streamed)

Nothing here decides fatality; callers classify the replies.
*/

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::StreamExt;
use serde_json::{Value, json};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::log_debug;

/// Virtual-volume scheme marker prefixed to every remote destination path.
pub const VOLUME_PREFIX: &str = "agitransfer://";

const SPEC_TIMEOUT: Duration = Duration::from_secs(30);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(180);
const ZIP_TIMEOUT: Duration = Duration::from_secs(60);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(180);

/// Reply from a proxied command execution.
#[derive(Debug)]
pub enum CommandReply {
    /// 2xx with a parsed JSON body.
    Ok(Value),
    /// 400 with a structured error object.
    BadRequest(Value),
}

/// Reply from the archive-build endpoint.
#[derive(Debug)]
pub enum ZipReply {
    /// 2xx; `stdout` should carry the signed download URL.
    Accepted { stdout: Option<String> },
    /// 400; diagnostic already base64-decoded as far as possible.
    Refused { diagnostic: String },
}

/// HTTP client bound to one service root and credential.
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    api_key: String,
    /// Pass `verbose` through to server-side tooling.
    verbose: bool,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base: config.api_url.clone(),
            api_key: config.api_key.clone(),
            verbose: config.debug,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Fetch the OpenAPI document from `/openapi.json`.
    pub async fn fetch_spec(&self) -> Result<Value> {
        let url = format!("{}/openapi.json", self.base);
        log_debug!("Fetching OpenAPI spec from {url}");
        let resp = self
            .http
            .get(&url)
            .timeout(SPEC_TIMEOUT)
            .send()
            .await
            .context("Failed to fetch OpenAPI spec")?;
        if !resp.status().is_success() {
            bail!("Failed to fetch OpenAPI spec: HTTP {}", resp.status());
        }
        resp.json::<Value>()
            .await
            .context("Invalid OpenAPI spec format received from server")
    }

    /// Proxy one schema-derived command to the service.
    pub async fn execute(&self, method: &str, path: &str, body: &Value) -> Result<CommandReply> {
        let url = format!("{}{}", self.base, path);
        log_debug!("Making {method} request to {url}");
        let m = reqwest::Method::from_bytes(method.as_bytes())
            .with_context(|| format!("Unsupported HTTP method: {method}"))?;
        let resp = self
            .http
            .request(m, &url)
            .timeout(COMMAND_TIMEOUT)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;

        let status = resp.status();
        log_debug!("Response status: {status}");
        // Status first; only 400 and 2xx bodies are guaranteed to be JSON.
        if status == reqwest::StatusCode::BAD_REQUEST {
            let data: Value = resp
                .json()
                .await
                .context("Invalid response format from server")?;
            return Ok(CommandReply::BadRequest(data));
        }
        if !status.is_success() {
            bail!("HTTP {status} from {url}");
        }
        let data: Value = resp
            .json()
            .await
            .context("Invalid response format from server")?;
        Ok(CommandReply::Ok(data))
    }

    /// Ask the service to archive the user's remote workspace.
    pub async fn zip_directory(&self) -> Result<ZipReply> {
        let url = format!("{}/agitransfer/zip-directory", self.base);
        let payload = json!({
            "agint_apikey": self.api_key,
            "directory_path": format!("{VOLUME_PREFIX}/"),
            "verbose": self.verbose,
            "api_key": self.api_key,
        });
        log_debug!("Initiating sync: calling {url}");
        let resp = self
            .http
            .post(&url)
            .timeout(ZIP_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .context("zip-directory request failed")?;

        let status = resp.status();
        log_debug!("Zip response status: {status}");
        if status == reqwest::StatusCode::BAD_REQUEST {
            let raw = resp.text().await.unwrap_or_default();
            let diagnostic = serde_json::from_str::<Value>(&raw)
                .ok()
                .and_then(|v| {
                    let decoded =
                        decode_b64_text(v.get("stderr").and_then(|s| s.as_str()).unwrap_or(""))?;
                    Some(decoded)
                })
                .filter(|s| !s.is_empty())
                .unwrap_or(raw);
            return Ok(ZipReply::Refused { diagnostic });
        }
        if !status.is_success() {
            bail!("zip-directory returned HTTP {status}");
        }
        let data: Value = resp
            .json()
            .await
            .context("zip-directory returned a non-JSON body")?;
        Ok(ZipReply::Accepted {
            stdout: data
                .get("stdout")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }

    /// Raw per-file upload POST. The fan-out engine classifies the reply.
    pub(crate) async fn upload_file_raw(
        &self,
        payload: &Value,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let url = format!("{}/agitransfer/upload-file", self.base);
        self.http
            .post(&url)
            .timeout(UPLOAD_TIMEOUT)
            .json(payload)
            .send()
            .await
    }

    /// Stream a (potentially large) archive to `dest`, writing incrementally.
    /// Returns the number of bytes written.
    pub async fn download_to_file(&self, url: &str, dest: &Path) -> Result<u64> {
        log_debug!("Downloading {url} -> {}", dest.display());
        let resp = self
            .http
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .context("Failed to start archive download")?;
        if !resp.status().is_success() {
            bail!("Archive download failed: HTTP {}", resp.status());
        }

        let mut file = std::fs::File::create(dest)
            .with_context(|| format!("Failed to create scratch file: {}", dest.display()))?;
        let mut written: u64 = 0;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error reading download stream")?;
            file.write_all(&chunk)
                .context("Error writing to scratch file")?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }
}

/// Decode a base64 text field, lossily converting to UTF-8.
/// Returns None when the field is not valid base64.
pub fn decode_b64_text(raw: &str) -> Option<String> {
    let bytes = BASE64.decode(raw.trim()).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}
