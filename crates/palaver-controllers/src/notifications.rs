use std::sync::Mutex;

use serde_json::Value;
use tracing::debug;

use crate::signal::Signal;

/// A notification ready for display by the host shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
}

#[derive(Default)]
struct FocusState {
    blurred: bool,
}

/// Emits window-level notifications driven by focus changes and
/// service-originated messages.
///
/// Messages only produce a notification while the window is blurred;
/// a focused user is already looking at the timeline.
pub struct NotificationsController {
    title: String,
    state: Mutex<FocusState>,
    notify_signal: Signal<Notification>,
}

impl NotificationsController {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            state: Mutex::new(FocusState::default()),
            notify_signal: Signal::new(),
        }
    }

    pub fn on_notify(&self, listener: impl Fn(Notification) + Send + Sync + 'static) {
        self.notify_signal.connect(listener);
    }

    pub fn is_blurred(&self) -> bool {
        self.state.lock().expect("focus state lock").blurred
    }

    /// The window lost focus. Subsequent messages raise notifications.
    pub fn window_blurred(&self) {
        self.state.lock().expect("focus state lock").blurred = true;
    }

    /// The window regained focus. Emits a plain title notification so the
    /// shell can clear any attention markers.
    pub fn window_focused(&self) {
        let was_blurred = {
            let mut state = self.state.lock().expect("focus state lock");
            std::mem::replace(&mut state.blurred, false)
        };
        if was_blurred {
            self.notify_signal.emit(Notification {
                title: self.title.clone(),
            });
        }
    }

    /// Handles a structured message from the sync service. Only
    /// `NEW_MESSAGE` actions are recognized.
    pub fn handle_message(&self, message: &Value) {
        let action = message.get("action").and_then(Value::as_str);
        if action != Some("NEW_MESSAGE") {
            debug!(?action, "ignoring unrecognized service message");
            return;
        }
        if !self.is_blurred() {
            return;
        }
        self.notify_signal.emit(Notification {
            title: format!("⚡ {}", self.title),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn collect(controller: &NotificationsController) -> Arc<Mutex<Vec<String>>> {
        let titles = Arc::new(Mutex::new(Vec::new()));
        let titles_in = titles.clone();
        controller.on_notify(move |n| {
            titles_in.lock().unwrap().push(n.title);
        });
        titles
    }

    #[tokio::test]
    async fn message_while_blurred_notifies_with_marker() {
        let controller = NotificationsController::new("Palaver");
        let titles = collect(&controller);

        controller.window_blurred();
        controller.handle_message(&json!({ "action": "NEW_MESSAGE" }));
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(titles.lock().unwrap().as_slice(), ["⚡ Palaver"]);
    }

    #[tokio::test]
    async fn message_while_focused_is_silent() {
        let controller = NotificationsController::new("Palaver");
        let titles = collect(&controller);

        controller.handle_message(&json!({ "action": "NEW_MESSAGE" }));
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(titles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn refocus_emits_plain_title_once() {
        let controller = NotificationsController::new("Palaver");
        let titles = collect(&controller);

        controller.window_blurred();
        controller.window_focused();
        controller.window_focused();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(titles.lock().unwrap().as_slice(), ["Palaver"]);
    }

    #[tokio::test]
    async fn unknown_actions_are_ignored() {
        let controller = NotificationsController::new("Palaver");
        let titles = collect(&controller);

        controller.window_blurred();
        controller.handle_message(&json!({ "action": "SOMETHING_ELSE" }));
        controller.handle_message(&json!({}));
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(titles.lock().unwrap().is_empty());
    }
}
