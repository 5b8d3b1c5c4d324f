//! JSON log lines: tracing output and run artefacts, one object per line (ndjson).

use chrono::Utc;
use serde::Serialize;
use std::io::Write;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// A run artefact (epoch record, threshold, report) tagged with its run.
#[derive(Serialize)]
pub struct RunEvent<'a, T: Serialize> {
    pub ts: String,
    pub run_id: Uuid,
    pub kind: &'a str,
    #[serde(flatten)]
    pub body: &'a T,
}

impl<'a, T: Serialize> RunEvent<'a, T> {
    pub fn new(run_id: Uuid, kind: &'a str, body: &'a T) -> Self {
        Self {
            ts: Utc::now().to_rfc3339(),
            run_id,
            kind,
            body,
        }
    }
}

pub struct StructuredLogger;

impl StructuredLogger {
    /// Install global subscriber: JSON lines or plain text to stderr, level
    /// from RUST_LOG or `default_level`. Stdout is left to the report.
    pub fn init(json: bool, default_level: &str) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
        if json {
            let fmt = tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::NONE)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry().with(filter).with(fmt).try_init();
        } else {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .try_init();
        }
    }

    /// Write one event as a single JSON line.
    pub fn emit_json(event: &impl Serialize, w: &mut impl Write) -> std::io::Result<()> {
        let line = serde_json::to_string(event).map_err(std::io::Error::from)?;
        writeln!(w, "{}", line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[derive(Serialize)]
    struct Body {
        epoch: usize,
        loss: f32,
    }

    #[test]
    fn run_event_flattens_body() {
        let run_id = Uuid::new_v4();
        let body = Body { epoch: 3, loss: 0.5 };
        let mut out = Vec::new();
        StructuredLogger::emit_json(&RunEvent::new(run_id, "epoch", &body), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["kind"], "epoch");
        assert_eq!(v["epoch"], 3);
        assert_eq!(v["run_id"], run_id.to_string());
    }
}
