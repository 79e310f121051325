use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};

/// Latest parsed device telemetry plus its receive time.
#[derive(Debug, Clone)]
pub struct TelemetryRecord {
    pub values: BTreeMap<String, Value>,
    pub received_at: Instant,
}

/// Sink for device-to-host lines: `STATS` lines become the latest telemetry
/// record and an atomic rewrite of the status file; everything else is
/// device log output and forwarded verbatim.
pub struct TelemetryHub {
    latest: Mutex<Option<TelemetryRecord>>,
    status_file: PathBuf,
}

impl TelemetryHub {
    pub fn new(status_file: PathBuf) -> Self {
        Self {
            latest: Mutex::new(None),
            status_file,
        }
    }

    pub fn handle_line(&self, line: &str) {
        let line = line.trim_end();
        if line.is_empty() {
            return;
        }
        match parse_stats_line(line) {
            Some(values) => {
                self.write_status_file(&values);
                let record = TelemetryRecord {
                    values,
                    received_at: Instant::now(),
                };
                *self.latest.lock().expect("lock telemetry") = Some(record);
            }
            None => info!("[device] {line}"),
        }
    }

    pub fn latest(&self) -> Option<TelemetryRecord> {
        self.latest.lock().expect("lock telemetry").clone()
    }

    /// Rewrite the status file atomically (temp file + rename) so readers
    /// never observe a torn JSON document.
    fn write_status_file(&self, values: &BTreeMap<String, Value>) {
        let now = Utc::now();
        let mut doc = serde_json::Map::new();
        for (k, v) in values {
            doc.insert(k.clone(), v.clone());
        }
        doc.insert("timestamp".into(), json!(now.timestamp_millis()));
        doc.insert(
            "timestamp_iso".into(),
            json!(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );

        let tmp = self.status_file.with_extension("json.tmp");
        let payload = Value::Object(doc).to_string();
        let result = fs::write(&tmp, payload).and_then(|_| fs::rename(&tmp, &self.status_file));
        if let Err(err) = result {
            warn!(
                "Failed to write status file {}: {err}",
                self.status_file.display()
            );
        }
    }
}

/// Parse a `STATS key=value ...` line. Values are coerced to numbers where
/// they parse; `fb` stays a hex string (it is a 2-hex-digit bitmask).
pub fn parse_stats_line(line: &str) -> Option<BTreeMap<String, Value>> {
    let rest = line.strip_prefix("STATS ")?;
    let mut values = BTreeMap::new();
    for pair in rest.split_whitespace() {
        let Some((key, raw)) = pair.split_once('=') else {
            continue;
        };
        values.insert(key.to_string(), coerce(key, raw));
    }
    Some(values)
}

fn coerce(key: &str, raw: &str) -> Value {
    if key == "fb" {
        return Value::String(raw.to_string());
    }
    if let Ok(n) = raw.parse::<i64>() {
        return json!(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return json!(f);
    }
    Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "STATS up=42 cmd=1234 pix=99000 flush=413 err=2 t0=31.5 t1=29.9 v=5.02 i=3.40 fb=FF trip=0 lim=7 mode=0";

    #[test]
    fn parses_stats_keys_and_numbers() {
        let values = parse_stats_line(LINE).expect("stats line");
        assert_eq!(values["up"], json!(42));
        assert_eq!(values["t0"], json!(31.5));
        assert_eq!(values["i"], json!(3.4));
        assert_eq!(values["mode"], json!(0));
    }

    #[test]
    fn fb_mask_stays_hex_string() {
        let values = parse_stats_line(LINE).expect("stats line");
        assert_eq!(values["fb"], json!("FF"));
        let values = parse_stats_line("STATS fb=00").expect("stats line");
        assert_eq!(values["fb"], json!("00"));
    }

    #[test]
    fn info_lines_are_not_stats() {
        assert!(parse_stats_line("Channel 3 TRIPPED! (voltage: 0.120V)").is_none());
        assert!(parse_stats_line("Channel 3 recovered (voltage: 2.110V)").is_none());
        assert!(parse_stats_line("=== Ready ===").is_none());
    }

    #[test]
    fn status_file_is_written_with_timestamps() {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "showrunner_status_test_{}.json",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let hub = TelemetryHub::new(path.clone());
        hub.handle_line(LINE);

        let doc: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["up"], json!(42));
        assert_eq!(doc["fb"], json!("FF"));
        assert!(doc["timestamp"].is_i64());
        assert!(doc["timestamp_iso"].is_string());
        assert!(hub.latest().is_some());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn non_stats_lines_do_not_touch_latest() {
        let mut path = std::env::temp_dir();
        path.push("showrunner_status_untouched.json");
        let hub = TelemetryHub::new(path);
        hub.handle_line("booting...");
        assert!(hub.latest().is_none());
    }
}
