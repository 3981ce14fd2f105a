//! `ipcfleet scan`: walk recorded files over a time range.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use ipcfleet_api::rpc::media_file_find::FileInfo;
use ipcfleet_core::{CoreError, FileSink, ScanRange, ScanSummary};

use crate::cli::{GlobalOpts, OutputFormat, ScanArgs};
use crate::commands::Context;
use crate::error::CliError;
use crate::output;

/// Accepts a full RFC 3339 timestamp or a bare date at UTC midnight.
fn parse_time(field: &str, value: &str) -> Result<DateTime<Utc>, CliError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| CliError::Validation {
            field: field.into(),
            reason: format!("expected RFC 3339 or YYYY-MM-DD, got '{value}'"),
        })
}

// ── Sink ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct FileLine<'a> {
    device: &'a str,
    #[serde(flatten)]
    file: &'a FileInfo,
}

/// Prints every file as it arrives.
struct StdoutSink {
    format: OutputFormat,
    quiet: bool,
}

impl StdoutSink {
    fn render(&self, device: &str, file: &FileInfo) -> Result<String, serde_json::Error> {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonCompact => serde_json::to_string(&FileLine { device, file }),
            OutputFormat::Plain => Ok(file.file_path.clone()),
            OutputFormat::Table => Ok(format!(
                "{}  {}  ch{}  {:<4} {}",
                file.start_time, file.end_time, file.channel, file.kind, file.file_path
            )),
        }
    }
}

impl FileSink for StdoutSink {
    async fn upsert(&self, device: &str, files: &[FileInfo]) -> Result<u64, CoreError> {
        if !self.quiet {
            for file in files {
                let line = self.render(device, file).map_err(|e| CoreError::Sink { message: e.to_string() })?;
                output::print_line(&line).map_err(|e| CoreError::Sink { message: e.to_string() })?;
            }
        }
        Ok(u64::try_from(files.len()).unwrap_or(u64::MAX))
    }
}

// ── Handler ──────────────────────────────────────────────────────────

pub async fn handle(ctx: &Context, args: ScanArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let start = parse_time("start", &args.start)?;
    let end = match args.end.as_deref() {
        Some(end) => parse_time("end", end)?,
        None => Utc::now(),
    };
    let range = ScanRange::new(start, end)?;

    ctx.register(&args.device).await?;
    let sink = StdoutSink {
        format: global.format.clone(),
        quiet: global.quiet,
    };
    let summary = ctx.fleet.scan(&args.device, range, &sink, &ctx.cancel).await?;
    tracing::info!(device = %summary.device, files = summary.files, "scan complete");

    // Structured formats already emitted one line per file.
    if matches!(global.format, OutputFormat::Table) {
        output::print_output(&summary_text(&summary), global.quiet);
    }
    Ok(())
}

fn summary_text(summary: &ScanSummary) -> String {
    output::detail(&[
        ("Device", summary.device.clone()),
        ("Start", summary.range.start().to_rfc3339()),
        ("End", summary.range.end().to_rfc3339()),
        ("Windows", summary.periods.to_string()),
        ("Files", summary.files.to_string()),
    ])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn parses_dates_and_timestamps() {
        assert_eq!(
            parse_time("start", "2024-03-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_time("start", "2024-03-01T08:30:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 6, 30, 0).unwrap()
        );
        let err = parse_time("end", "yesterday").unwrap_err();
        assert!(matches!(err, CliError::Validation { ref field, .. } if field == "end"));
    }

    #[test]
    fn json_file_lines_carry_the_device() {
        let sink = StdoutSink {
            format: OutputFormat::JsonCompact,
            quiet: true,
        };
        let file = FileInfo {
            file_path: "/mnt/sd/a.dav".into(),
            ..FileInfo::default()
        };
        let line = sink.render("cam-1", &file).unwrap();
        assert!(line.starts_with(r#"{"device":"cam-1","#));
        assert!(line.contains(r#""FilePath":"/mnt/sd/a.dav""#));
    }

    #[tokio::test]
    async fn quiet_sink_still_counts() {
        let sink = StdoutSink {
            format: OutputFormat::Plain,
            quiet: true,
        };
        let files = vec![FileInfo::default(), FileInfo::default()];
        assert_eq!(sink.upsert("cam-1", &files).await.unwrap(), 2);
    }
}
