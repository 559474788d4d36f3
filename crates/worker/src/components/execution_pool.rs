use std::future::Future;
use std::sync::Arc;

use anomaly_core::{SchedulerError, SchedulerResult};
use tokio::sync::Semaphore;

use super::AbortOnDrop;

/// 有界任务执行池
///
/// 同时运行的任务数不超过容量；许可随任务一起结束或被中止时释放。
#[derive(Debug, Clone)]
pub struct ExecutionPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ExecutionPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn running(&self) -> usize {
        self.capacity - self.available()
    }

    /// 等待空闲许可后在后台执行
    pub async fn submit<F, T>(&self, future: F) -> SchedulerResult<AbortOnDrop<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| SchedulerError::Internal("任务执行池已关闭".to_string()))?;

        Ok(AbortOnDrop::new(tokio::spawn(async move {
            let _permit = permit;
            future.await
        })))
    }

    /// 关闭后不再接受新任务
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_permit_released_after_completion() {
        let pool = ExecutionPool::new(2);
        let handle = pool.submit(async { 1 }).await.unwrap();
        assert_eq!(handle.await.unwrap(), 1);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_permit_released_after_abort() {
        let pool = ExecutionPool::new(1);
        let handle = pool
            .submit(tokio::time::sleep(Duration::from_secs(30)))
            .await
            .unwrap();
        assert_eq!(pool.running(), 1);

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_work() {
        let pool = ExecutionPool::new(1);
        pool.close();
        assert!(pool.submit(async {}).await.is_err());
    }
}
