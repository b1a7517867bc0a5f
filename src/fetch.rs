//! Fetching live fleet snapshots over HTTP.
//!
//! The upstream map endpoint returns one JSON document with every place
//! and bike. We stamp it with a `_fetched_at` capture timestamp before
//! saving, since ordering of stored snapshots relies on that field.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Local, SecondsFormat};
use reqwest::{Request, Response};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::select::{SNAPSHOT_PREFIX, SNAPSHOT_SUFFIX};

/// Default upstream endpoint; override via `BIKE_FLOW_URL`.
pub const DEFAULT_URL: &str = "https://api-gateway.nextbike.pl/api/maps/service/pl/locations";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}

pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self(client))
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: Request) -> reqwest::Result<Response> {
        self.0.execute(req).await
    }
}

/// Fetches one snapshot document and stamps it with the given capture
/// time. Non-2xx responses and non-JSON bodies are errors; there is no
/// retry here, the caller re-invokes on its own schedule.
pub async fn fetch_snapshot<C: HttpClient>(
    client: &C,
    url: &str,
    fetched_at: &DateTime<Local>,
) -> Result<Value> {
    let req = Request::new(reqwest::Method::GET, url.parse()?);
    let resp = client
        .execute(req)
        .await
        .with_context(|| format!("snapshot fetch from {url} failed"))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(anyhow!("snapshot fetch from {url} returned HTTP {status}"));
    }

    let payload: Value = resp.json().await.context("snapshot body is not JSON")?;
    Ok(stamp_fetched_at(
        payload,
        &fetched_at.to_rfc3339_opts(SecondsFormat::Secs, false),
    ))
}

/// Injects the capture timestamp. Object payloads get a `_fetched_at`
/// key; anything else is wrapped so the field is always at the top level.
pub fn stamp_fetched_at(payload: Value, timestamp: &str) -> Value {
    match payload {
        Value::Object(mut map) => {
            map.insert("_fetched_at".to_string(), json!(timestamp));
            Value::Object(map)
        }
        other => json!({ "_fetched_at": timestamp, "data": other }),
    }
}

/// Filename under the snapshot convention for a given capture time.
pub fn snapshot_filename(fetched_at: &DateTime<Local>) -> String {
    format!(
        "{SNAPSHOT_PREFIX}{}{SNAPSHOT_SUFFIX}",
        fetched_at.format("%Y-%m-%d_%H_%M_%S")
    )
}

/// Writes the stamped snapshot into `data_dir`, creating it as needed.
pub fn save_snapshot(
    payload: &Value,
    data_dir: &Path,
    fetched_at: &DateTime<Local>,
) -> Result<PathBuf> {
    fs::create_dir_all(data_dir)
        .with_context(|| format!("cannot create {}", data_dir.display()))?;
    let path = data_dir.join(snapshot_filename(fetched_at));
    fs::write(&path, serde_json::to_string_pretty(payload)?)
        .with_context(|| format!("cannot write {}", path.display()))?;
    info!(path = %path.display(), "Saved snapshot");
    Ok(path)
}
