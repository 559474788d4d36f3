use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Worker 配置
///
/// 所有时间参数以毫秒为单位。每个字段都有默认值，配置文件可以只写需要覆盖的部分。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// 固定 Worker ID，需要在集群内全局唯一
    pub id: Option<i64>,
    /// 每次启动生成随机 ID（临时身份），此时心跳是唯一的存活信号
    pub random_worker_id_enabled: bool,
    /// 工作循环数量，同时也是执行池和心跳池的上限
    pub max_parallel_tasks: usize,
    pub task_fetch_size_cap: usize,
    pub no_task_delay_ms: u64,
    pub task_failure_delay_ms: u64,
    pub random_delay_cap_ms: u64,
    pub max_task_run_time_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub stale_lease_threshold_ms: u64,
    pub shutdown_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            id: None,
            random_worker_id_enabled: false,
            max_parallel_tasks: 5,
            task_fetch_size_cap: 50,
            no_task_delay_ms: 15_000,
            task_failure_delay_ms: 30_000,
            random_delay_cap_ms: 15_000,
            max_task_run_time_ms: 6 * 60 * 60 * 1000,
            heartbeat_interval_ms: 30_000,
            stale_lease_threshold_ms: 600_000,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_parallel_tasks == 0 {
            return Err(anyhow::anyhow!("最大并行任务数必须大于0"));
        }

        if self.task_fetch_size_cap == 0 {
            return Err(anyhow::anyhow!("任务拉取批次上限必须大于0"));
        }

        if self.max_task_run_time_ms == 0 {
            return Err(anyhow::anyhow!("任务最长运行时间必须大于0"));
        }

        if self.heartbeat_interval_ms == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.stale_lease_threshold_ms <= self.heartbeat_interval_ms {
            return Err(anyhow::anyhow!(
                "过期租约阈值({}ms)必须大于心跳间隔({}ms)",
                self.stale_lease_threshold_ms,
                self.heartbeat_interval_ms
            ));
        }

        if self.enabled && !self.random_worker_id_enabled {
            match self.id {
                None => return Err(anyhow::anyhow!("未启用随机ID时必须配置Worker ID")),
                Some(id) if id < 0 => {
                    return Err(anyhow::anyhow!("Worker ID不能为负数: {id}"));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    pub fn no_task_delay(&self) -> Duration {
        Duration::from_millis(self.no_task_delay_ms)
    }

    pub fn task_failure_delay(&self) -> Duration {
        Duration::from_millis(self.task_failure_delay_ms)
    }

    pub fn max_task_run_time(&self) -> Duration {
        Duration::from_millis(self.max_task_run_time_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn stale_lease_threshold(&self) -> Duration {
        Duration::from_millis(self.stale_lease_threshold_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// 解析本进程的 Worker 身份
    ///
    /// 随机 ID 模式优先于固定 ID；每次调用都会生成新的随机 ID。
    pub fn resolve_identity(&self) -> anyhow::Result<WorkerIdentity> {
        if self.random_worker_id_enabled {
            let id = rand::rng().random_range(0..i64::from(i32::MAX));
            return Ok(WorkerIdentity::Ephemeral(id));
        }
        match self.id {
            Some(id) if id >= 0 => Ok(WorkerIdentity::Fixed(id)),
            Some(id) => Err(anyhow::anyhow!("Worker ID不能为负数: {id}")),
            None => Err(anyhow::anyhow!("未启用随机ID时必须配置Worker ID")),
        }
    }
}

/// Worker 身份
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerIdentity {
    /// 外部分配的全局唯一 ID
    Fixed(i64),
    /// 本次启动随机生成的 ID，重启后不再相同
    Ephemeral(i64),
}

impl WorkerIdentity {
    pub fn id(&self) -> i64 {
        match self {
            WorkerIdentity::Fixed(id) | WorkerIdentity::Ephemeral(id) => *id,
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, WorkerIdentity::Ephemeral(_))
    }
}
