//! Events pushed to the extension that are not replies to a request.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostEvent {
    /// Show a feedback page or toast to the user.
    Notify { title: String, message: String },
    /// Open `url` in a new tab, closing the requesting tab if asked.
    #[serde(rename_all = "camelCase")]
    OpenTab { url: String, close_caller: bool },
}

/// Sender half of the host event channel. Sending never fails; with nobody listening
/// the event is only logged.
#[derive(Debug, Clone)]
pub struct HostEvents {
    tx: Option<mpsc::UnboundedSender<HostEvent>>,
}

impl HostEvents {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Events go nowhere.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn notify(&self, title: &str, message: &str) {
        warn!(%title, "{message}");
        self.send(HostEvent::Notify {
            title: title.to_string(),
            message: message.to_string(),
        });
    }

    pub fn open_tab(&self, url: &str, close_caller: bool) {
        self.send(HostEvent::OpenTab {
            url: url.to_string(),
            close_caller,
        });
    }

    fn send(&self, event: HostEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
