use std::future::Future;
use tokio::task::JoinError;

/// Fixed-size pool of identified workers.
///
/// Exactly `size` long-lived tasks are started; concurrency is bounded by
/// the pool size itself rather than by a permit per task.
pub struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self { size }
    }

    /// Start `size` workers, handing each its id, and wait for all of them.
    ///
    /// Results come back in worker-id order.
    pub async fn run<F, Fut>(&self, mut make: F) -> Vec<Result<Fut::Output, JoinError>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let handles: Vec<_> = (0..self.size).map(|id| tokio::spawn(make(id))).collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await);
        }
        results
    }
}
