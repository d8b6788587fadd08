//! Session Logging
//!
//! Append-only JSONL ledgers of everything the engine does: one
//! serialized record per line. Files are opened, appended, and closed
//! per write so no handle is held across cycles.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

/// Writers for the per-session log files:
/// `session_{stamp}.jsonl` for every event kind and
/// `dialog_{stamp}.jsonl` for human exchanges only.
pub struct SessionLog {
    session_id: String,
    log_file: PathBuf,
    dialog_file: PathBuf,
}

impl SessionLog {
    /// Create the log directory (if needed) and pick the session file
    /// names from the current timestamp.
    pub fn new(log_dir: &str) -> Result<Self> {
        let dir = PathBuf::from(log_dir);
        fs::create_dir_all(&dir).context("Failed to create log directory")?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        Ok(Self {
            session_id: Uuid::new_v4().to_string(),
            log_file: dir.join(format!("session_{}.jsonl", stamp)),
            dialog_file: dir.join(format!("dialog_{}.jsonl", stamp)),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub fn dialog_file(&self) -> &Path {
        &self.dialog_file
    }

    /// Append one structured record to the session log.
    ///
    /// `kind` is one of: `session_start`, `thought`, `compress`,
    /// `dialog`, `human_input`, `search_request`, `remember`, `feel`,
    /// `message`, `unknown_tool`.
    pub fn write(
        &self,
        kind: &str,
        content: &str,
        n: u64,
        context_chars: usize,
        meta: Option<Value>,
    ) -> Result<()> {
        let mut record = json!({
            "time": Utc::now().to_rfc3339(),
            "n": n,
            "kind": kind,
            "content": content,
            "contextChars": context_chars,
            "sessionId": self.session_id,
        });
        if let Some(meta) = meta {
            record["meta"] = meta;
        }
        append_line(&self.log_file, &record)
    }

    /// Append one human/engine exchange to the dialog log.
    pub fn write_dialog(
        &self,
        human: &str,
        reply: &str,
        thought: u64,
        context_chars: usize,
    ) -> Result<()> {
        let record = json!({
            "time": Utc::now().to_rfc3339(),
            "thought": thought,
            "human": human,
            "ai": reply,
            "contextChars": context_chars,
        });
        append_line(&self.dialog_file, &record)
    }
}

/// Open, append one line, and close.
fn append_line(path: &Path, record: &Value) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context("Failed to open log file")?;
    writeln!(file, "{}", record).context("Failed to append log record")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log_dir(tag: &str) -> String {
        let dir = std::env::temp_dir().join(format!(
            "autoloop_log_test_{}_{}",
            tag,
            Uuid::new_v4()
        ));
        dir.to_string_lossy().to_string()
    }

    #[test]
    fn test_write_appends_one_line_per_record() {
        let dir = temp_log_dir("write");
        let log = SessionLog::new(&dir).unwrap();

        log.write("session_start", "seed", 0, 4, None).unwrap();
        log.write(
            "thought",
            "some text",
            1,
            14,
            Some(json!({ "tokensGenerated": 42 })),
        )
        .unwrap();

        let contents = fs::read_to_string(log.log_file()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["kind"], "session_start");
        assert_eq!(first["sessionId"], log.session_id());

        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["n"], 1);
        assert_eq!(second["meta"]["tokensGenerated"], 42);
    }

    #[test]
    fn test_dialog_records_go_to_separate_file() {
        let dir = temp_log_dir("dialog");
        let log = SessionLog::new(&dir).unwrap();

        log.write_dialog("hello", "hi there", 3, 100).unwrap();

        let contents = fs::read_to_string(log.dialog_file()).unwrap();
        let record: Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(record["human"], "hello");
        assert_eq!(record["ai"], "hi there");
        assert_eq!(record["thought"], 3);
        assert!(!log.log_file().exists());
    }
}
