use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anomaly_core::{SchedulerError, SchedulerResult, TaskStore, WorkerConfig, WorkerIdentity};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::acquisition::{TaskAcquisitionLoop, WorkerShared};
use crate::components::LeaseRecovery;
use crate::runners::TaskRunnerRegistry;

/// 任务驱动器
///
/// 负责启动时的租约恢复、工作循环的生命周期和优雅关闭。
pub struct TaskDriver {
    shared: Arc<WorkerShared>,
    shutdown_tx: watch::Sender<bool>,
    watchers: Mutex<Option<JoinSet<()>>>,
    started: AtomicBool,
}

impl TaskDriver {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn TaskStore>,
        runners: Arc<TaskRunnerRegistry>,
    ) -> SchedulerResult<Self> {
        config
            .validate()
            .map_err(|e| SchedulerError::config_error(e.to_string()))?;
        let identity = config
            .resolve_identity()
            .map_err(|e| SchedulerError::config_error(e.to_string()))?;
        Ok(Self::with_identity(identity, config, store, runners))
    }

    /// 使用已解析的身份创建
    pub fn with_identity(
        identity: WorkerIdentity,
        config: WorkerConfig,
        store: Arc<dyn TaskStore>,
        runners: Arc<TaskRunnerRegistry>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(WorkerShared::new(identity, config, store, runners)),
            shutdown_tx,
            watchers: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn worker_id(&self) -> i64 {
        self.shared.worker_id()
    }

    pub fn identity(&self) -> WorkerIdentity {
        self.shared.identity
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !*self.shutdown_tx.borrow()
    }

    /// 恢复遗留任务后启动工作循环
    pub async fn start(&self) -> SchedulerResult<()> {
        let config = &self.shared.config;
        if !config.enabled {
            info!("Worker 未启用，跳过启动");
            return Ok(());
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::Internal("任务驱动器已经启动".to_string()));
        }

        let worker_id = self.worker_id();
        info!(
            "启动任务驱动器: worker {}, 临时身份 {}, 工作循环 {}",
            worker_id,
            self.shared.identity.is_ephemeral(),
            config.max_parallel_tasks
        );

        let recovery = LeaseRecovery::new(Arc::clone(&self.shared.store));
        let leftovers = recovery.handle_leftover_tasks(worker_id).await?;
        if leftovers > 0 {
            info!("已将 {} 个遗留任务标记为失败", leftovers);
        }
        // 临时身份无法找回上一次启动的任务，只能依据心跳判断
        if self.shared.identity.is_ephemeral() {
            let reclaimed = recovery
                .reclaim_stale_leases(config.stale_lease_threshold(), None)
                .await?;
            if reclaimed > 0 {
                info!("已回收 {} 个过期租约", reclaimed);
            }
        }

        let mut watchers = JoinSet::new();
        for slot in 0..config.max_parallel_tasks {
            let watcher = TaskAcquisitionLoop::new(
                Arc::clone(&self.shared),
                slot,
                self.shutdown_tx.subscribe(),
            );
            watchers.spawn(watcher.run());
        }
        *self.watchers.lock().await = Some(watchers);

        info!("任务驱动器 {} 启动成功", worker_id);
        Ok(())
    }

    /// 通知所有工作循环停止，并在关闭超时内等待运行中的任务结束
    ///
    /// 超时后仍未结束的任务被中止，保持 RUNNING 状态，由下次启动的恢复流程处理。
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let Some(mut watchers) = self.watchers.lock().await.take() else {
            return;
        };

        info!("正在停止任务驱动器 {}", self.worker_id());
        let timeout = self.shared.config.shutdown_timeout();
        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = watchers.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("工作循环异常退出: {}", e);
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "{}ms 内仍有 {} 个工作循环未结束，强制中止",
                timeout.as_millis(),
                watchers.len()
            );
            watchers.abort_all();
            while watchers.join_next().await.is_some() {}
        }

        self.shared.execution_pool.close();
        info!("任务驱动器 {} 已停止", self.worker_id());
    }
}
