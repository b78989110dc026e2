use serde::Serialize;
use std::io::Write;

/// A machine readable progress event, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressEvent {
    Progress { message: String },
    ProgressStage { stage: String },
}

/// Prints progress events to stdout when enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct Progress {
    enabled: bool,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn message(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::Progress {
            message: message.into(),
        });
    }

    pub fn stage(&self, stage: impl Into<String>) {
        self.emit(ProgressEvent::ProgressStage { stage: stage.into() });
    }

    fn emit(&self, event: ProgressEvent) {
        if !self.enabled {
            return;
        }
        if let Ok(line) = serde_json::to_string(&event) {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            // A closed stdout must not abort the run.
            let _ = writeln!(handle, "{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_a_type_tag() {
        let message = ProgressEvent::Progress {
            message: "50.0% rendered".to_owned(),
        };
        let stage = ProgressEvent::ProgressStage {
            stage: "Aligning frames".to_owned(),
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"type": "PROGRESS", "message": "50.0% rendered"})
        );
        assert_eq!(
            serde_json::to_value(&stage).unwrap(),
            json!({"type": "PROGRESS_STAGE", "stage": "Aligning frames"})
        );
    }
}
