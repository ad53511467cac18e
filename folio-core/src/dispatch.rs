use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::selection::{Selection, SelectionDetector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionIntent {
    Explain,
    Exemplify,
    Quiz,
}

impl ActionIntent {
    pub const ALL: [ActionIntent; 3] = [Self::Explain, Self::Exemplify, Self::Quiz];

    pub fn label(self) -> &'static str {
        match self {
            ActionIntent::Explain => "Explain",
            ActionIntent::Exemplify => "Examples",
            ActionIntent::Quiz => "Quiz Me",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ActionIntent::Explain => "Clear and direct explanation",
            ActionIntent::Exemplify => "Practical, real-world cases",
            ActionIntent::Quiz => "Test your knowledge",
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            ActionIntent::Explain => "explain",
            ActionIntent::Exemplify => "exemplify",
            ActionIntent::Quiz => "quiz",
        }
    }
}

impl fmt::Display for ActionIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// One-shot request handed to the conversation surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub intent: ActionIntent,
    #[serde(rename = "text")]
    pub payload_text: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no text is selected")]
    NoSelection,
    #[error("selected text is empty")]
    EmptySelection,
}

/// Receives action requests. Submission is fire-and-forget.
pub trait ConversationSink: Send + Sync {
    /// Brings the conversation surface into view before a request arrives.
    fn reveal(&self) {}

    fn submit(&self, request: ActionRequest);
}

pub struct ActionDispatcher {
    sink: Arc<dyn ConversationSink>,
}

impl ActionDispatcher {
    pub fn new(sink: Arc<dyn ConversationSink>) -> Self {
        Self { sink }
    }

    /// Consumes the live selection and forwards it with `intent`.
    pub fn dispatch(
        &self,
        detector: &mut SelectionDetector,
        intent: ActionIntent,
    ) -> Result<ActionRequest, DispatchError> {
        let selection = detector.take().ok_or(DispatchError::NoSelection)?;
        self.dispatch_selection(selection, intent)
    }

    pub fn dispatch_selection(
        &self,
        selection: Selection,
        intent: ActionIntent,
    ) -> Result<ActionRequest, DispatchError> {
        if selection.text.trim().is_empty() {
            return Err(DispatchError::EmptySelection);
        }
        let request = ActionRequest {
            intent,
            payload_text: selection.text,
        };
        info!(%intent, chars = request.payload_text.chars().count(), "dispatching action");
        self.sink.reveal();
        self.sink.submit(request.clone());
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Rect, Size};
    use crate::selection::{
        ElementKind, ElementPath, SelectedRange, SelectionSettings, SelectionSource,
    };
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct RecordingSink {
        log: Mutex<Vec<String>>,
        requests: Mutex<Vec<ActionRequest>>,
    }

    impl ConversationSink for RecordingSink {
        fn reveal(&self) {
            self.log.lock().push("reveal".into());
        }

        fn submit(&self, request: ActionRequest) {
            self.log.lock().push("submit".into());
            self.requests.lock().push(request);
        }
    }

    struct FixedSelection(SelectedRange);

    impl SelectionSource for FixedSelection {
        fn current(&self) -> Option<SelectedRange> {
            Some(self.0.clone())
        }
    }

    fn document_target() -> ElementPath {
        ElementPath::new(vec![
            ElementKind::DocumentContainer,
            ElementKind::Page(2),
            ElementKind::TextLayer,
        ])
    }

    fn active_detector(text: &str) -> SelectionDetector {
        let source = FixedSelection(SelectedRange {
            text: text.into(),
            bounds: Rect::new(100.0, 100.0, 200.0, 20.0),
            ancestor: document_target(),
        });
        let mut detector = SelectionDetector::new(
            Arc::new(source),
            SelectionSettings::default(),
            Size::new(1024.0, 768.0),
        );
        let now = Instant::now();
        detector.pointer_up(&document_target(), now);
        detector.poll(now + Duration::from_millis(10));
        detector
    }

    #[test]
    fn dispatch_consumes_selection_and_reveals_before_submit() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = ActionDispatcher::new(sink.clone());
        let mut detector = active_detector("  photosynthesis ");
        assert!(detector.is_active());

        let request = dispatcher
            .dispatch(&mut detector, ActionIntent::Exemplify)
            .unwrap();
        assert_eq!(request.payload_text, "photosynthesis");
        assert_eq!(request.intent, ActionIntent::Exemplify);
        assert!(!detector.is_active());
        assert_eq!(*sink.log.lock(), vec!["reveal", "submit"]);
        assert_eq!(*sink.requests.lock(), vec![request]);
    }

    #[test]
    fn dispatch_without_selection_fails() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = ActionDispatcher::new(sink.clone());
        let mut detector = active_detector("osmosis");
        detector.dismiss();

        let err = dispatcher
            .dispatch(&mut detector, ActionIntent::Quiz)
            .unwrap_err();
        assert_eq!(err, DispatchError::NoSelection);
        assert!(sink.log.lock().is_empty());
    }

    #[test]
    fn blank_selection_is_rejected() {
        let dispatcher = ActionDispatcher::new(Arc::new(RecordingSink::default()));
        let selection = Selection {
            text: "   ".into(),
            anchor_x: 0.0,
            anchor_y: 0.0,
        };
        assert_eq!(
            dispatcher.dispatch_selection(selection, ActionIntent::Explain),
            Err(DispatchError::EmptySelection)
        );
    }

    #[test]
    fn request_serializes_as_intent_and_text() {
        let request = ActionRequest {
            intent: ActionIntent::Quiz,
            payload_text: "mitochondria".into(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"intent":"quiz","text":"mitochondria"}"#);
    }

    #[test]
    fn intents_carry_labels() {
        let labels: Vec<_> = ActionIntent::ALL.iter().map(|i| i.label()).collect();
        assert_eq!(labels, vec!["Explain", "Examples", "Quiz Me"]);
        assert_eq!(ActionIntent::Exemplify.to_string(), "exemplify");
        assert_eq!(
            ActionIntent::Explain.description(),
            "Clear and direct explanation"
        );
    }
}
