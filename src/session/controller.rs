//! Enable/disable handle for a running session

use std::sync::Arc;

use tokio::sync::watch;

/// Requested run mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Enabled,
    Disabled,
    Shutdown,
}

/// Cloneable handle that switches speech control on and off
#[derive(Debug, Clone)]
pub struct VoiceController {
    tx: Arc<watch::Sender<Control>>,
}

impl VoiceController {
    /// New controller, initially disabled
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Control::Disabled);
        Self { tx: Arc::new(tx) }
    }

    /// Start listening for the wake word
    pub fn enable(&self) {
        self.set(Control::Enabled);
    }

    /// Stop listening; takes effect immediately, in-flight transcripts are discarded
    pub fn disable(&self) {
        self.set(Control::Disabled);
    }

    /// Stop the session loop for good
    pub fn shutdown(&self) {
        self.set(Control::Shutdown);
    }

    fn set(&self, control: Control) {
        let previous = self.tx.send_replace(control);
        if previous != control {
            tracing::debug!(from = ?previous, to = ?control, "voice control changed");
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        *self.tx.borrow() == Control::Enabled
    }

    #[must_use]
    pub fn current(&self) -> Control {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Control> {
        self.tx.subscribe()
    }
}

impl Default for VoiceController {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve once control leaves [`Control::Enabled`]
pub(crate) async fn until_not_enabled(rx: &mut watch::Receiver<Control>) {
    let _ = rx.wait_for(|c| *c != Control::Enabled).await;
}
