//! Build progress reporting.
//!
//! Reports observable progress during `lawdex build` so users see which
//! phase is running and how much is left. Progress goes to **stderr** so
//! stdout stays parseable for scripts.

use std::io::Write;

/// A single progress event for a build.
#[derive(Clone, Debug, PartialEq)]
pub enum BuildProgressEvent {
    /// Walking and hashing the corpus. Total unknown.
    Scanning,
    /// Scan diffed against the registry.
    Scanned {
        new: u64,
        modified: u64,
        deleted: u64,
        unchanged: u64,
    },
    /// n of total changed files parsed and stored.
    Parsing { n: u64, total: u64 },
    /// n of total pending chunks vectorized.
    Vectorizing { n: u64, total: u64 },
    /// Rebuilding the semantic and lexical indices.
    Reindexing,
}

impl BuildProgressEvent {
    fn phase(&self) -> &'static str {
        match self {
            BuildProgressEvent::Scanning | BuildProgressEvent::Scanned { .. } => "scan",
            BuildProgressEvent::Parsing { .. } => "parse",
            BuildProgressEvent::Vectorizing { .. } => "vectorize",
            BuildProgressEvent::Reindexing => "reindex",
        }
    }
}

/// Reports build progress. Implementations write to stderr (human or JSON).
pub trait BuildProgressReporter: Send + Sync {
    fn report(&self, event: BuildProgressEvent);
}

/// Human-friendly progress on stderr: "build  parse  12 / 40 files".
pub struct StderrProgress;

impl BuildProgressReporter for StderrProgress {
    fn report(&self, event: BuildProgressEvent) {
        let line = match &event {
            BuildProgressEvent::Scanning => "build  scan  discovering...\n".to_string(),
            BuildProgressEvent::Scanned {
                new,
                modified,
                deleted,
                unchanged,
            } => format!(
                "build  scan  {} new, {} modified, {} deleted, {} unchanged\n",
                format_number(*new),
                format_number(*modified),
                format_number(*deleted),
                format_number(*unchanged)
            ),
            BuildProgressEvent::Parsing { n, total } => format!(
                "build  parse  {} / {} files\n",
                format_number(*n),
                format_number(*total)
            ),
            BuildProgressEvent::Vectorizing { n, total } => format!(
                "build  vectorize  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
            BuildProgressEvent::Reindexing => "build  reindex\n".to_string(),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

fn event_json(event: &BuildProgressEvent) -> serde_json::Value {
    let mut obj = serde_json::json!({
        "event": "progress",
        "phase": event.phase(),
    });
    let extra = match event {
        BuildProgressEvent::Scanned {
            new,
            modified,
            deleted,
            unchanged,
        } => serde_json::json!({
            "new": new,
            "modified": modified,
            "deleted": deleted,
            "unchanged": unchanged
        }),
        BuildProgressEvent::Parsing { n, total } | BuildProgressEvent::Vectorizing { n, total } => {
            serde_json::json!({ "n": n, "total": total })
        }
        BuildProgressEvent::Scanning | BuildProgressEvent::Reindexing => serde_json::json!({}),
    };
    if let (Some(target), Some(fields)) = (obj.as_object_mut(), extra.as_object()) {
        for (k, v) in fields {
            target.insert(k.clone(), v.clone());
        }
    }
    obj
}

impl BuildProgressReporter for JsonProgress {
    fn report(&self, event: BuildProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event_json(&event)) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl BuildProgressReporter for NoProgress {
    fn report(&self, _event: BuildProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn BuildProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn json_events_carry_phase_and_counts() {
        let v = event_json(&BuildProgressEvent::Vectorizing { n: 8, total: 20 });
        assert_eq!(v["phase"], "vectorize");
        assert_eq!(v["n"], 8);
        assert_eq!(v["total"], 20);
        assert_eq!(event_json(&BuildProgressEvent::Reindexing)["phase"], "reindex");
    }
}
