use std::future::Future;

use bevy::tasks::{Task, TaskPool};

use super::{JoinHandle, Runtime};

impl Runtime for TaskPool {
    type JoinHandle = Option<Task<()>>;

    fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) -> Self::JoinHandle {
        // Kept rather than detached: dropping a bevy task cancels it
        tracing::trace!("[TaskPool::spawn] Spawning task");
        Some(TaskPool::spawn(self, task))
    }
}

impl JoinHandle for Option<Task<()>> {
    fn abort(&mut self) {
        if let Some(task) = self.take() {
            tracing::trace!("[TaskPool] Cancelling task");
            drop(task);
        }
    }
}
