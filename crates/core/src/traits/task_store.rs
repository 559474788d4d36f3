//! 任务存储接口定义
//!
//! 任务表是租约归属的唯一事实来源。Worker 对任务行的所有修改都必须通过
//! 带条件的比较并交换（CAS）完成：
//!
//! - 获取租约: 状态 ∈ 允许的前置集合 且 版本号与调用方观察到的一致
//! - 终态转换: 当前状态必须等于期望的前置状态（通常是 `RUNNING`）
//!
//! 两类操作都返回 `bool` 表示条件是否命中，条件不满足时不产生任何修改。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{NewTask, Task, TaskStatus};
use crate::SchedulerResult;

/// 任务存储接口
///
/// # 线程安全
///
/// 实现需要 `Send + Sync`，同一个存储实例会被所有工作循环、心跳任务和
/// 执行中的任务共享。
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 创建 `WAITING` 状态、版本号为 0 的任务
    async fn create(&self, task: NewTask) -> SchedulerResult<Task>;

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>>;

    /// 按创建时间排序拉取最多 `limit` 个 `WAITING` 任务
    ///
    /// # 参数
    ///
    /// * `limit` - 批次上限
    /// * `ascending` - `true` 时最早创建的在前；工作循环每次调用交替该参数，
    ///   使不同 Worker 从队列两端竞争
    async fn find_waiting_ordered_by_create_time(
        &self,
        limit: usize,
        ascending: bool,
    ) -> SchedulerResult<Vec<Task>>;

    /// 尝试获取租约
    ///
    /// 当且仅当任务当前状态在 `allowed_prior` 中且版本号等于
    /// `expected_version` 时，把任务改为 `RUNNING`、归属 `worker_id`、
    /// 版本号加一，并记录开始时间。
    ///
    /// # 返回值
    ///
    /// 命中条件返回 `true`。对同一 `(task_id, version)` 的并发调用恰好有一个返回 `true`。
    async fn try_acquire(
        &self,
        worker_id: i64,
        task_id: i64,
        allowed_prior: &[TaskStatus],
        expected_version: i32,
    ) -> SchedulerResult<bool>;

    /// 带前置状态守卫的终态转换
    ///
    /// 仅当存储中的状态仍为 `expected_prior` 时写入 `new_status`、结束时间和消息；
    /// 否则为空操作并返回 `false`。迟到的完成结果不会覆盖已经被超时或恢复改写的任务。
    async fn complete_with_status(
        &self,
        task_id: i64,
        expected_prior: TaskStatus,
        new_status: TaskStatus,
        end_time_millis: i64,
        message: Option<String>,
    ) -> SchedulerResult<bool>;

    /// 写入存活时间戳，任务不是 `RUNNING` 时不做修改
    async fn touch_heartbeat(&self, task_id: i64) -> SchedulerResult<()>;

    /// 查询 `RUNNING` 且归属指定 Worker 的任务（启动恢复）
    async fn find_running_owned_by(&self, worker_id: i64) -> SchedulerResult<Vec<Task>>;

    /// 查询 `RUNNING` 且最近存活时间早于 `threshold` 的任务
    ///
    /// 没有心跳记录时以开始时间为准。
    async fn find_running_inactive_since(
        &self,
        threshold: DateTime<Utc>,
    ) -> SchedulerResult<Vec<Task>>;
}
