// ── Recording-catalog scan ──
//
// Walks a device's recordings over a time range and hands every page of
// file metadata to a `FileSink`. Devices return bad data for searches
// spanning more than about a month, so the range is split into windows of
// at most `MAX_SCAN_PERIOD`, newest first.

use std::future::Future;

use chrono::{DateTime, TimeDelta, Utc};
use ipcfleet_api::rpc::media_file_find::{Condition, FileInfo, FileStream};
use ipcfleet_api::rpc::{RpcGen, Timestamp};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bus::EventBus;
use crate::device::DeviceClient;
use crate::error::CoreError;
use crate::event::FleetEvent;
use crate::lock::LockStore;

/// Longest window sent in one `mediaFileFind` search.
pub const MAX_SCAN_PERIOD: TimeDelta = TimeDelta::days(30);

// ── Range & periods ─────────────────────────────────────────────────

/// Half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl ScanRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, CoreError> {
        if start > end {
            return Err(CoreError::InvalidRange {
                message: format!("start {start} is after end {end}"),
            });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn periods(&self) -> ScanPeriodIter {
        ScanPeriodIter {
            start: self.start,
            end: self.end,
            cursor: self.end,
        }
    }
}

/// One search window. Inclusive start, exclusive end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Windows of at most [`MAX_SCAN_PERIOD`], from the end of the range back
/// to its start.
#[derive(Debug, Clone)]
pub struct ScanPeriodIter {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    cursor: DateTime<Utc>,
}

impl ScanPeriodIter {
    /// Share of the range already yielded, 0 to 100.
    pub fn percent(&self) -> f64 {
        if self.cursor == self.start {
            return 100.0;
        }
        let done = (self.end - self.cursor).num_milliseconds();
        let total = (self.end - self.start).num_milliseconds();
        ratio(done, total) * 100.0
    }

    /// Oldest instant covered so far.
    pub fn cursor(&self) -> DateTime<Utc> {
        self.cursor
    }
}

impl Iterator for ScanPeriodIter {
    type Item = ScanPeriod;

    fn next(&mut self) -> Option<ScanPeriod> {
        if self.cursor == self.start {
            return None;
        }
        let end = self.cursor;
        let start = (end - MAX_SCAN_PERIOD).max(self.start);
        self.cursor = start;
        Some(ScanPeriod { start, end })
    }
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn ratio(part: i64, whole: i64) -> f64 {
    part as f64 / whole as f64
}

// ── FileSink ────────────────────────────────────────────────────────

/// Destination of scanned file metadata, usually a catalog store.
pub trait FileSink: Send + Sync {
    /// Persist one page of files for `device`. Returns how many were
    /// accepted.
    fn upsert(&self, device: &str, files: &[FileInfo]) -> impl Future<Output = Result<u64, CoreError>> + Send;
}

/// Outcome of a completed scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanSummary {
    pub device: String,
    pub range: ScanRange,
    /// Windows searched.
    pub periods: u32,
    /// Files accepted by the sink.
    pub files: u64,
}

// ── Scan ────────────────────────────────────────────────────────────

/// Scan `range` on `device` into `sink`.
///
/// Holds the device's entry in `locks` for the whole run; a concurrent scan
/// of the same device fails at once with `ResourceLocked`. Progress is
/// published on `bus` after every window. Every search cursor opened on
/// the device is closed again, whatever the outcome.
pub async fn scan_files<S: FileSink>(
    device: &DeviceClient,
    locks: &LockStore<String>,
    bus: &EventBus<FleetEvent>,
    sink: &S,
    range: ScanRange,
    cancel: &CancellationToken,
) -> Result<ScanSummary, CoreError> {
    let _guard = locks.try_lock(device.id().to_owned())?;
    info!(device = %device.id(), start = %range.start, end = %range.end, "scan started");

    let tz = device.config().timezone;
    let mut periods = range.periods();
    let mut summary = ScanSummary {
        device: device.id().to_owned(),
        range,
        periods: 0,
        files: 0,
    };

    while let Some(period) = periods.next() {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        debug!(device = %device.id(), start = %period.start, end = %period.end, "scanning window");

        let base = Condition::new(
            Timestamp::from_utc(period.start, tz),
            Timestamp::from_utc(period.end, tz),
        );
        for condition in [base.clone().picture(), base.video()] {
            summary.files += scan_condition(device, &condition, sink, cancel).await?;
        }
        summary.periods += 1;

        let progress = FleetEvent::ScanProgress {
            device: summary.device.clone(),
            percent: periods.percent(),
            files: summary.files,
        };
        if let Err(e) = bus.publish(cancel, progress).await {
            debug!(device = %device.id(), error = %e, "scan progress not published");
        }
    }

    info!(
        device = %device.id(),
        periods = summary.periods,
        files = summary.files,
        "scan finished"
    );
    Ok(summary)
}

/// Drain one search into the sink, closing the cursor on every path.
async fn scan_condition<S: FileSink>(
    device: &DeviceClient,
    condition: &Condition,
    sink: &S,
    cancel: &CancellationToken,
) -> Result<u64, CoreError> {
    let rpc = device.rpc();
    let mut stream = FileStream::open(rpc, condition).await?;
    let result = drain(device.id(), rpc, &mut stream, sink, cancel).await;
    stream.close(rpc).await;
    result
}

async fn drain<S: FileSink>(
    device: &str,
    rpc: &impl RpcGen,
    stream: &mut FileStream,
    sink: &S,
    cancel: &CancellationToken,
) -> Result<u64, CoreError> {
    let mut accepted = 0;
    loop {
        let page = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CoreError::Cancelled),
            page = stream.next_page(rpc) => page?,
        };
        if page.is_empty() {
            return Ok(accepted);
        }
        accepted += sink.upsert(device, &page).await?;
    }
}
