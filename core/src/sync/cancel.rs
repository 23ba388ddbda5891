use tokio::sync::watch;
use tracing::trace;

/// Creates a cancellation pair. The handle side cancels; tokens observe.
///
/// Dropping every handle cancels outstanding tokens, so a pipeline whose
/// owner goes away (client disconnect, proxy shutdown) stops without an
/// explicit `cancel` call.
pub fn cancellation(name: &'static str) -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle { name, tx },
        CancelToken { name, rx },
    )
}

#[derive(Debug)]
pub struct CancelHandle {
    name: &'static str,
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        trace!("Cancelling '{}'", self.name);
        let _ = self.tx.send(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            name: self.name,
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    name: &'static str,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once the pipeline should stop. Checked between frames, never
    /// mid-frame: the unit of atomicity is one frame.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Every handle is gone.
                return;
            }
        }
    }
}
