// `mediaFileFind.*` methods and a paging cursor over recorded files.
//
// A search is a device-side object: create it, start it with a condition,
// page with findNextFile, then close and destroy it. Devices hold a small
// number of these, so a leaked cursor eventually blocks new searches.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::Error;
use crate::rpc::RpcGen;
use crate::rpc::wire::{Timestamp, extract_file_path_tags};

const PAGE_SIZE: u32 = 64;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// ── Condition ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    #[default]
    Ascent,
    Descent,
}

/// Search filter for `mediaFileFind.findFile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Condition {
    pub channel: i64,
    pub dirs: Option<Vec<String>>,
    pub types: Vec<String>,
    pub order: Order,
    pub redundant: String,
    pub events: Option<Vec<String>>,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub flags: Vec<String>,
}

impl Condition {
    /// Videos and pictures between two device-local timestamps.
    pub fn new(start_time: Timestamp, end_time: Timestamp) -> Self {
        Self {
            channel: 0,
            dirs: None,
            types: strings(&["dav", "jpg"]),
            order: Order::Ascent,
            redundant: "Exclusion".into(),
            events: None,
            start_time,
            end_time,
            flags: strings(&["Timing", "Event", "Event", "Manual"]),
        }
    }

    pub fn video(mut self) -> Self {
        self.types = strings(&["dav"]);
        self
    }

    pub fn picture(mut self) -> Self {
        self.types = strings(&["jpg"]);
        self.flags = strings(&["Timing", "Event", "Event"]);
        self
    }

    pub fn channel(mut self, channel: i64) -> Self {
        self.channel = channel;
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

// ── Results ─────────────────────────────────────────────────────────

/// One recorded file as reported by `findNextFile`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FileInfo {
    pub channel: i64,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub length: i64,
    #[serde(rename = "Type")]
    pub kind: String,
    pub file_path: String,
    pub duration: i64,
    pub disk: i64,
    pub video_stream: String,
    pub flags: Vec<String>,
    pub events: Vec<String>,
    pub cluster: i64,
    pub partition: i64,
    pub pic_index: i64,
    pub repeat: i64,
    /// Working directory, e.g. `/mnt/dvr/mmc0p2_0`.
    pub work_dir: String,
    /// Non-zero when `work_dir` is named after the serial number.
    #[serde(rename = "WorkDirSN")]
    pub work_dir_sn: i64,
}

impl FileInfo {
    /// Stored on the device's own disk, so downloadable through `RPC_Loadfile`.
    pub fn is_local(&self) -> bool {
        self.file_path.starts_with('/')
    }

    pub fn tags(&self) -> Vec<String> {
        extract_file_path_tags(&self.file_path)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FindNextFileResult {
    #[serde(default)]
    pub found: u32,
    #[serde(default)]
    pub infos: Option<Vec<FileInfo>>,
}

// ── Raw calls ───────────────────────────────────────────────────────

/// Create a search object and return its handle.
pub async fn create(rpc: &impl RpcGen) -> Result<i64, Error> {
    let res = rpc
        .rpc()
        .await?
        .method("mediaFileFind.factory.create")
        .send::<Value>()
        .await?
        .check()?;
    Ok(res.result.value())
}

/// Start a search. `Ok(false)` means the device found nothing.
pub async fn find_file(rpc: &impl RpcGen, object: i64, condition: &Condition) -> Result<bool, Error> {
    let res = rpc
        .rpc()
        .await?
        .method("mediaFileFind.findFile")
        .params(json!({ "condition": condition }))
        .object(object)
        .send::<Value>()
        .await?
        .check()?;
    Ok(res.result.as_bool())
}

pub async fn find_next_file(
    rpc: &impl RpcGen,
    object: i64,
    count: u32,
) -> Result<FindNextFileResult, Error> {
    let params: Option<FindNextFileResult> = rpc
        .rpc()
        .await?
        .method("mediaFileFind.findNextFile")
        .params(json!({ "count": count }))
        .object(object)
        .send_checked()
        .await?;
    Ok(params.unwrap_or_default())
}

#[derive(Deserialize)]
struct Count {
    #[serde(default)]
    count: u64,
}

pub async fn get_count(rpc: &impl RpcGen, object: i64) -> Result<u64, Error> {
    let params: Option<Count> = rpc
        .rpc()
        .await?
        .method("mediaFileFind.getCount")
        .object(object)
        .send_checked()
        .await?;
    Ok(params.map_or(0, |c| c.count))
}

pub async fn close(rpc: &impl RpcGen, object: i64) -> Result<bool, Error> {
    object_call(rpc, "mediaFileFind.close", object).await
}

pub async fn destroy(rpc: &impl RpcGen, object: i64) -> Result<bool, Error> {
    object_call(rpc, "mediaFileFind.destroy", object).await
}

async fn object_call(rpc: &impl RpcGen, method: &str, object: i64) -> Result<bool, Error> {
    let res = rpc
        .rpc()
        .await?
        .method(method)
        .object(object)
        .send::<Value>()
        .await?
        .check()?;
    Ok(res.result.as_bool())
}

// ── FileStream ──────────────────────────────────────────────────────

/// Paging cursor over one search.
///
/// The device-side object is closed and destroyed once the cursor is
/// exhausted, on the first error, or on an explicit [`FileStream::close`].
/// Callers that abandon the stream early must call `close`.
#[derive(Debug)]
pub struct FileStream {
    object: i64,
    count: u32,
    closed: bool,
}

impl FileStream {
    /// Create the search object and start the search.
    ///
    /// A `NoData` reply to `findFile` yields an already-exhausted stream.
    pub async fn open(rpc: &impl RpcGen, condition: &Condition) -> Result<Self, Error> {
        let object = create(rpc).await?;
        let mut stream = Self {
            object,
            count: PAGE_SIZE,
            closed: false,
        };

        match find_file(rpc, object, condition).await {
            Ok(true) => {}
            Ok(false) => stream.close(rpc).await,
            Err(e) if e.is_no_data() => {
                debug!(object, "search matched no files");
                stream.close(rpc).await;
            }
            Err(e) => {
                stream.close(rpc).await;
                return Err(e);
            }
        }

        Ok(stream)
    }

    pub fn object(&self) -> i64 {
        self.object
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Fetch the next page. An empty vector means the stream is exhausted.
    pub async fn next_page(&mut self, rpc: &impl RpcGen) -> Result<Vec<FileInfo>, Error> {
        if self.closed {
            return Ok(Vec::new());
        }

        let page = match find_next_file(rpc, self.object, self.count).await {
            Ok(page) => page,
            Err(e) => {
                self.close(rpc).await;
                return Err(e);
            }
        };

        let Some(infos) = page.infos else {
            self.close(rpc).await;
            return Ok(Vec::new());
        };

        if page.found < self.count {
            self.close(rpc).await;
        }

        Ok(infos)
    }

    /// Close and destroy the device-side object. Best-effort and bounded.
    pub async fn close(&mut self, rpc: &impl RpcGen) {
        if self.closed {
            return;
        }
        self.closed = true;

        let object = self.object;
        let teardown = async {
            close(rpc, object).await?;
            destroy(rpc, object).await
        };

        match tokio::time::timeout(CLOSE_TIMEOUT, teardown).await {
            Ok(Ok(_)) => debug!(object, "search closed"),
            Ok(Err(e)) => warn!(object, error = %e, "failed to close search"),
            Err(_) => warn!(object, "timed out closing search"),
        }
    }
}
