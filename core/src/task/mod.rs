use crate::sync::cancel::{CancelToken, cancellation};
use std::cell::RefCell;
use std::rc::Rc;
use tokio::task::JoinSet;
use tokio_shutdown::Shutdown;
use tracing::{Instrument, info_span};

type MutableJoinSet = Rc<RefCell<JoinSet<()>>>;

/// Owns the process task set and the shutdown-to-cancellation bridge.
///
/// Process signals (SIGINT/SIGTERM) cancel the root token, so every pipeline
/// holding a derived token observes shutdown as cooperative cancellation.
pub struct Builder {
    join_set: MutableJoinSet,
    cancel: CancelToken,
}

impl Builder {
    pub fn new_task(&self, name: &'static str) -> Spawner {
        Spawner {
            name,
            join_set: self.join_set.clone(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub async fn join_all(self) {
        let join_set = self.join_set.take();
        let _ = join_set.join_all().await;
    }
}

impl Default for Builder {
    fn default() -> Self {
        #[allow(clippy::expect_used)]
        let shutdown = Shutdown::new().expect("Failed to create shutdown handle");

        let (cancel_handle, cancel_token) = cancellation("shutdown");
        tokio::spawn(async move {
            let () = shutdown.handle().await;
            cancel_handle.cancel();
        });

        Self {
            join_set: MutableJoinSet::default(),
            cancel: cancel_token,
        }
    }
}

pub struct Spawner {
    name: &'static str,
    join_set: MutableJoinSet,
}

impl Spawner {
    #[track_caller]
    pub fn spawn<F>(self, task: F)
    where
        F: Future<Output = ()>,
        F: Send + 'static,
    {
        let span = info_span!("task", name = self.name);
        self.join_set.borrow_mut().spawn(task.instrument(span));
    }
}
