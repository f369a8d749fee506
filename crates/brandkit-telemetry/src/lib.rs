use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use brandkit_core::{TelemetryEvent, TelemetryEventType, TelemetrySink};
use serde::Serialize;

pub const SINK_ENV: &str = "BRANDKIT_TELEMETRY_SINK";
pub const FILE_ENV: &str = "BRANDKIT_TELEMETRY_FILE";

pub fn sink_from_env() -> Option<Box<dyn TelemetrySink>> {
    let mode = std::env::var(SINK_ENV).ok()?;
    let file = std::env::var(FILE_ENV).ok();
    sink_for(&mode, file.as_deref())
}

/// `stdout`, `file` (needs a path) or `log`. Anything else disables telemetry.
pub fn sink_for(mode: &str, file: Option<&str>) -> Option<Box<dyn TelemetrySink>> {
    match mode.trim().to_ascii_lowercase().as_str() {
        "stdout" => Some(Box::new(StdoutSink)),
        "file" => {
            let path = file.filter(|v| !v.trim().is_empty())?;
            Some(Box::new(FileSink::new(PathBuf::from(path))))
        }
        "log" | "tracing" => Some(Box::new(TracingSink)),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TelemetryEnvelope {
    event_type: String,
    asset: Option<String>,
    duration_ms: Option<u64>,
    detail: Option<String>,
}

impl From<&TelemetryEvent> for TelemetryEnvelope {
    fn from(event: &TelemetryEvent) -> Self {
        Self {
            event_type: format!("{:?}", event.event_type),
            asset: event.asset.map(|kind| kind.label().to_string()),
            duration_ms: event.duration_ms,
            detail: event.detail.clone(),
        }
    }
}

pub struct StdoutSink;

impl TelemetrySink for StdoutSink {
    fn emit(&self, event: TelemetryEvent) {
        if let Ok(line) = serde_json::to_string(&TelemetryEnvelope::from(&event)) {
            println!("{}", line);
        }
    }
}

pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn write_line(&self, line: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("creating telemetry log parent directory")?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("opening telemetry file")?;
        writeln!(file, "{}", line).context("writing telemetry line")?;
        Ok(())
    }
}

impl TelemetrySink for FileSink {
    fn emit(&self, event: TelemetryEvent) {
        if let Ok(line) = serde_json::to_string(&TelemetryEnvelope::from(&event)) {
            if let Err(err) = self.write_line(&line) {
                tracing::debug!(error = %err, "telemetry line dropped");
            }
        }
    }
}

/// Routes events into the process `tracing` subscriber.
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: TelemetryEvent) {
        let asset = event.asset.map(|kind| kind.label()).unwrap_or("-");
        let detail = event.detail.as_deref().unwrap_or("");
        match event.event_type {
            TelemetryEventType::AssetBestEffort | TelemetryEventType::AssetError | TelemetryEventType::PipelineError => {
                tracing::warn!(target: "brandkit::telemetry", event = ?event.event_type, asset, duration_ms = event.duration_ms, detail)
            }
            _ => tracing::info!(target: "brandkit::telemetry", event = ?event.event_type, asset, duration_ms = event.duration_ms, detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brandkit_core::AssetKind;

    #[test]
    fn unknown_or_incomplete_modes_disable_telemetry() {
        assert!(sink_for("http", None).is_none());
        assert!(sink_for("file", None).is_none());
        assert!(sink_for("file", Some("  ")).is_none());
        assert!(sink_for(" STDOUT ", None).is_some());
        assert!(sink_for("log", None).is_some());
    }

    #[test]
    fn file_sink_appends_json_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("events.jsonl");
        let sink = FileSink::new(path.clone());
        for event_type in [TelemetryEventType::AssetStart, TelemetryEventType::AssetEncoded] {
            sink.emit(TelemetryEvent {
                event_type,
                asset: Some(AssetKind::HeaderLogo),
                duration_ms: Some(3),
                detail: None,
            });
        }
        let contents = std::fs::read_to_string(&path).expect("telemetry file written");
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["eventType"], "AssetStart");
        assert_eq!(lines[1]["asset"], "header-logo");
        assert_eq!(lines[1]["durationMs"], 3);
    }
}
