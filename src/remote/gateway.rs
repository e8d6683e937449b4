use crate::archivist::config::RemoteConfig;
use crate::archivist::record::Record;
use crate::error::RemoteError;
use crate::remote::wire::{self, WirePage};
use crate::remote::{
    Entity, FileDescriptor, HistoryCursor, Page, ProgressSink, RemoteClient, StorySource,
};
use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const DOWNLOAD_BUFFER_BYTES: usize = 64 * 1024;
const FLOOD_WAIT_PREFIX: &str = "FLOOD_WAIT_";
const MAX_FLOOD_WAIT_SECS: u64 = 300;

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

/// Map a non-success response to the error class the archiver reacts to.
fn classify_error(status: StatusCode, body: &str) -> RemoteError {
    let (code, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (
            if envelope.error.code == 0 {
                status.as_u16()
            } else {
                envelope.error.code
            },
            envelope.error.message,
        ),
        Err(_) => (status.as_u16(), body.trim().to_string()),
    };
    match message.as_str() {
        "CHAT_ADMIN_REQUIRED" => RemoteError::PermissionDenied(message),
        "LOCATION_INVALID" => RemoteError::BrokenFileLocation(message),
        _ => RemoteError::Rpc { code, message },
    }
}

fn is_retryable(err: &RemoteError) -> bool {
    match err {
        RemoteError::Transport(_) => true,
        RemoteError::Rpc { code, .. } => *code == 420 || *code == 429 || *code >= 500,
        _ => false,
    }
}

/// `FLOOD_WAIT_n` asks the client to back off for `n` seconds.
fn flood_wait(err: &RemoteError) -> Option<Duration> {
    let RemoteError::Rpc { message, .. } = err else {
        return None;
    };
    let secs = message.strip_prefix(FLOOD_WAIT_PREFIX)?.parse::<u64>().ok()?;
    Some(Duration::from_secs(secs.min(MAX_FLOOD_WAIT_SECS)))
}

fn history_request(entity: &Entity, chunk_size: usize, cursor: HistoryCursor) -> Value {
    let limit = chunk_size as i64;
    let (offset_id, add_offset) = match cursor {
        HistoryCursor::After(last_id) => (last_id + 1, -limit),
        HistoryCursor::Recent { window } => (0, window - limit),
    };
    json!({
        "peer": wire::input_peer(&entity.peer),
        "offset_id": offset_id,
        "add_offset": add_offset,
        "limit": limit,
    })
}

fn stories_request(entity: &Entity, source: StorySource, limit: usize, offset_id: i64) -> Value {
    json!({
        "peer": wire::input_peer(&entity.peer),
        "source": source.as_str(),
        "offset_id": offset_id,
        "limit": limit,
    })
}

fn decode_page(method: &str, value: Value) -> Result<Page> {
    let raw: WirePage = serde_json::from_value(value).map_err(|err| RemoteError::UnexpectedResponse {
        method: method.to_string(),
        detail: err.to_string(),
    })?;
    let now = Utc::now();
    let records = raw
        .records
        .into_iter()
        .map(Record::from_value)
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("{method} returned a non-object record"))?;
    Ok(Page {
        records,
        users: wire::parse_users(raw.users, now)?,
        chats: wire::parse_chats(raw.chats, now)?,
    })
}

/// HTTP client for the account gateway.
#[derive(Debug)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
    api_token: Option<String>,
    download_timeout: Duration,
    retry_attempts: u32,
    retry_interval: Duration,
}

impl GatewayClient {
    pub fn new(cfg: &RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .context("failed to build gateway http client")?;
        Ok(Self {
            client,
            base_url: cfg.gateway_url.trim_end_matches('/').to_string(),
            api_token: cfg.api_token.clone().filter(|t| !t.trim().is_empty()),
            download_timeout: Duration::from_secs(cfg.download_timeout_secs),
            retry_attempts: cfg.retry_attempts,
            retry_interval: Duration::from_millis(cfg.retry_interval_ms),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/v1/{method}", self.base_url)
    }

    fn send_once(&self, method: &str, body: &Value, timeout: Option<Duration>) -> Result<Response, RemoteError> {
        let mut request = self.client.post(self.url(method)).json(body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .map_err(|err| RemoteError::Transport(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(classify_error(status, &body))
    }

    fn send_with_retry(&self, method: &str, body: &Value, timeout: Option<Duration>) -> Result<Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(method, body, timeout) {
                Ok(response) => return Ok(response),
                Err(err) if attempt < self.retry_attempts && is_retryable(&err) => {
                    let delay = flood_wait(&err).unwrap_or(self.retry_interval);
                    warn!(
                        method,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "gateway call failed, retrying"
                    );
                    thread::sleep(delay);
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("gateway call {method} failed"));
                }
            }
        }
    }

    fn call(&self, method: &str, body: &Value) -> Result<Value> {
        debug!(method, "gateway call");
        let response = self.send_with_retry(method, body, None)?;
        response
            .json::<Value>()
            .map_err(|err| RemoteError::UnexpectedResponse {
                method: method.to_string(),
                detail: err.to_string(),
            })
            .with_context(|| format!("gateway call {method} returned invalid json"))
    }
}

fn copy_with_progress(
    response: &mut Response,
    out: &mut impl Write,
    total: u64,
    progress: &mut dyn ProgressSink,
) -> Result<u64> {
    let mut buf = vec![0u8; DOWNLOAD_BUFFER_BYTES];
    let mut downloaded = 0u64;
    loop {
        let n = response
            .read(&mut buf)
            .map_err(|err| RemoteError::Transport(err.to_string()))?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        downloaded += n as u64;
        progress.on_progress(downloaded, total.max(downloaded));
    }
    Ok(downloaded)
}

impl RemoteClient for GatewayClient {
    fn get_self(&self) -> Result<Entity> {
        let value = self.call("getSelf", &json!({}))?;
        Ok(wire::parse_peer(value)?.into_entity(0, Utc::now()))
    }

    fn get_entity_list(&self) -> Result<Vec<Entity>> {
        let value = self.call("getDialogs", &json!({}))?;
        wire::parse_dialogs(value, Utc::now())
    }

    fn fetch_history(&self, entity: &Entity, chunk_size: usize, cursor: HistoryCursor) -> Result<Page> {
        let value = self.call("getHistory", &history_request(entity, chunk_size, cursor))?;
        decode_page("getHistory", value)
    }

    fn fetch_stories(
        &self,
        entity: &Entity,
        source: StorySource,
        limit: usize,
        offset_id: i64,
    ) -> Result<Page> {
        let value = self.call(
            "getStories",
            &stories_request(entity, source, limit, offset_id),
        )?;
        decode_page("getStories", value)
    }

    fn download_to_path(
        &self,
        path: &Path,
        file: &FileDescriptor,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        let parent = path
            .parent()
            .with_context(|| format!("download target has no parent: {}", path.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;

        let body = json!({
            "location": file.location,
            "dc_id": file.dc_id,
            "size": file.size,
        });
        let mut response = self.send_with_retry("download", &body, Some(self.download_timeout))?;

        // Partial downloads stay in the temp file and never appear at `path`.
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
        let total = u64::try_from(file.size).unwrap_or(0);
        copy_with_progress(&mut response, tmp.as_file_mut(), total, progress)
            .with_context(|| format!("failed to download {}", path.display()))?;
        tmp.as_file_mut().flush()?;
        tmp.persist(path)
            .with_context(|| format!("failed to move download into {}", path.display()))?;
        Ok(())
    }

    fn get_account(&self) -> Result<Value> {
        self.call("getSelf", &json!({}))
    }

    fn get_contacts(&self) -> Result<Value> {
        self.call("getContacts", &json!({}))
    }

    fn get_sessions(&self) -> Result<Value> {
        self.call("getAuthorizations", &json!({}))
    }
}
