use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use folio_core::{ActionRequest, ConversationSink};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Appends every action request as one JSON line. Stands in for the
/// conversation surface, which is not part of the terminal reader.
pub struct Outbox {
    path: PathBuf,
    file: Mutex<File>,
}

impl Outbox {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create outbox directory {:?}", parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open outbox {:?}", path))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConversationSink for Outbox {
    fn submit(&self, request: ActionRequest) {
        let line = match serde_json::to_string(&request) {
            Ok(line) => line,
            Err(err) => {
                warn!(?err, "failed to encode action request");
                return;
            }
        };
        let mut file = self.file.lock();
        if let Err(err) = writeln!(file, "{line}").and_then(|_| file.flush()) {
            warn!(?err, path = ?self.path, "failed to append to outbox");
            return;
        }
        debug!(intent = %request.intent, "action request queued");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::ActionIntent;
    use tempfile::tempdir;

    #[test]
    fn requests_are_appended_as_json_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("outbox.jsonl");
        let outbox = Outbox::open(&path).unwrap();

        outbox.submit(ActionRequest {
            intent: ActionIntent::Explain,
            payload_text: "entropy".into(),
        });
        outbox.submit(ActionRequest {
            intent: ActionIntent::Quiz,
            payload_text: "enthalpy".into(),
        });

        let contents = fs::read_to_string(outbox.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"{"intent":"explain","text":"entropy"}"#,
                r#"{"intent":"quiz","text":"enthalpy"}"#,
            ]
        );
    }

    #[test]
    fn reopening_keeps_previous_requests() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox.jsonl");
        Outbox::open(&path).unwrap().submit(ActionRequest {
            intent: ActionIntent::Exemplify,
            payload_text: "osmosis".into(),
        });
        Outbox::open(&path).unwrap().submit(ActionRequest {
            intent: ActionIntent::Exemplify,
            payload_text: "diffusion".into(),
        });
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 2);
    }
}
