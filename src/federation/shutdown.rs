use tokio::sync::watch;

/// Trigger for cancelling sync passes.
///
/// Use `to_signal` to hand a [`ShutdownSignal`] to every pass that should
/// stop when `trigger` is called. Dropping the `Shutdown` triggers it too, so
/// it must be held for as long as the passes should run.
#[derive(Debug)]
pub struct Shutdown(watch::Sender<bool>);

impl Shutdown {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self(sender)
    }

    pub fn trigger(&mut self) {
        self.0.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    pub fn to_signal(&self) -> ShutdownSignal {
        ShutdownSignal(self.0.subscribe())
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver end of a [`Shutdown`].
#[derive(Debug, Clone)]
pub struct ShutdownSignal(watch::Receiver<bool>);

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow() || self.0.has_changed().is_err()
    }

    /// Resolves once the shutdown is triggered or dropped.
    pub async fn wait(&mut self) {
        // Err means the trigger was dropped, which counts as triggered.
        let _ = self.0.wait_for(|triggered| *triggered).await;
    }
}
