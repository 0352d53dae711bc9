use std::future::Future;

mod bevy_runtime;

/// A runtime abstraction allowing you to use any runtime for cockpitdecks
pub trait Runtime: Send + Sync + 'static {
    /// Associated handle to the spawned task
    type JoinHandle: JoinHandle;

    /// Spawn a new task; it runs until it returns or its handle is aborted
    fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) -> Self::JoinHandle;
}

/// A handle to a spawned task
pub trait JoinHandle: Send + Sync + 'static {
    /// Stop the task
    fn abort(&mut self);
}

/// Spawn `task` on `runtime`, boxed so connections and sessions can keep
/// handles of any runtime side by side
pub(crate) fn run_async<RT: Runtime>(
    task: impl Future<Output = ()> + Send + 'static,
    runtime: &RT,
) -> Box<dyn JoinHandle> {
    Box::new(runtime.spawn(task))
}
