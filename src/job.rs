use super::errors::PoolError;
use futures::FutureExt;
use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::Arc,
};
use tokio::sync::mpsc;


pub(crate) type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// What one job reports back: `Ok(Some(_))` is a hit, `Ok(None)` a miss.
pub type Outcome<T, E> = Result<Option<T>, E>;

/// Sending half of a call session's result channel.
pub(crate) type Sink<T, E> = mpsc::Sender<Outcome<T, E>>;


/// One payload bound to the work function and to the sink of the session that
/// submitted it. Consumed exactly once by exactly one worker.
pub(crate) struct Job {
    task: Task,
}

impl Job {

    pub(crate) fn new<P, T, E, F, Fut>(payload: P, work: Arc<F>, sink: Sink<T, E>) -> Self
    where
        P: Send + 'static,
        T: Send + 'static,
        E: From<PoolError> + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<T, E>> + Send + 'static,
    {
        let task = async move {
            // Calling `work` inside the guarded future catches panics raised
            // before its first await as well.
            let outcome = AssertUnwindSafe(async move { work(payload).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|panic_info| Err(E::from(panicked(panic_info))));

            deposit(&sink, outcome);
        };

        Self { task: Box::pin(task) }
    }

    /// Like [`Job::new`] but for synchronous work. The closure runs on the
    /// blocking pool while the worker that picked the job waits for it, so
    /// the job still occupies its worker slot.
    pub(crate) fn blocking<P, T, E, F>(payload: P, work: Arc<F>, sink: Sink<T, E>) -> Self
    where
        P: Send + 'static,
        T: Send + 'static,
        E: From<PoolError> + Send + 'static,
        F: Fn(P) -> Outcome<T, E> + Send + Sync + 'static,
    {
        let task = async move {
            let joined = tokio::task::spawn_blocking(move || {
                std::panic::catch_unwind(AssertUnwindSafe(move || work(payload)))
            })
            .await;

            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(panic_info)) => Err(E::from(panicked(panic_info))),
                Err(join_err) => Err(E::from(PoolError::JoinFailed(join_err.to_string()))),
            };

            deposit(&sink, outcome);
        };

        Self { task: Box::pin(task) }
    }

    #[inline(always)]
    pub(crate) async fn run(self) {
        self.task.await
    }
}

#[inline]
fn deposit<T, E>(sink: &Sink<T, E>, outcome: Outcome<T, E>) {
    // The channel has one slot per job of its session, so this can only fail
    // once the session has stopped listening.
    let _ = sink.try_send(outcome);
}

fn panicked(panic_info: Box<dyn Any + Send>) -> PoolError {
    let message = panic_info
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic_info.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());

    tracing::warn!(panic = %message, "job panicked");
    PoolError::Panic(message)
}
