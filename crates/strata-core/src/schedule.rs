//! Deferral to the next scheduling turn.

/// Runs `task` on a later turn of the ambient tokio runtime.
///
/// Outside a runtime there is no later turn to wait for, so the task runs
/// inline and a warning is logged.
pub fn defer<F>(task: F)
where
    F: FnOnce() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { task() });
        }
        Err(_) => {
            tracing::warn!("no tokio runtime available; running deferred task inline");
            task();
        }
    }
}
