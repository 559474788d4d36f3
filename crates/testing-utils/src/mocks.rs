//! Scripted operators and task store for pipeline and worker tests
//!
//! 算子的注册方式与生产算子相同，通过 `OperatorRegistry::register` 按组件类型名注册。
//! [`ScriptedTaskStore`] 包装任意 [`TaskStore`]，记录拉取参数并按需注入故障。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anomaly_core::{
    Anomaly, NewTask, SchedulerError, SchedulerResult, Task, TaskStatus, TaskStore,
};
use anomaly_pipeline::{Operator, OperatorContext, OperatorRegistry, OperatorResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

pub const RECORDING: &str = "Recording";
pub const CONSTANT: &str = "Constant";
pub const FAILING: &str = "Failing";
pub const SILENT: &str = "Silent";
pub const SLEEP: &str = "Sleep";

/// 记录算子执行顺序的共享日志
#[derive(Debug, Clone, Default)]
pub struct InvocationLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl InvocationLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, node: &str) -> usize {
        let mut calls = self.calls.lock().unwrap();
        calls.push(node.to_string());
        calls.len() - 1
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, node: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.as_str() == node)
            .count()
    }
}

/// 注册所有脚本算子；`Recording` 写入给定日志
pub fn scripted_registry(log: &InvocationLog) -> OperatorRegistry {
    let mut registry = OperatorRegistry::with_builtins();
    let recording_log = log.clone();
    registry
        .register(RECORDING, move || {
            Box::new(RecordingOperator::new(recording_log.clone()))
        })
        .unwrap();
    registry
        .register(CONSTANT, || Box::new(ConstantOperator::default()))
        .unwrap();
    registry
        .register(FAILING, || Box::new(FailingOperator::default()))
        .unwrap();
    registry
        .register(SILENT, || Box::new(SilentOperator))
        .unwrap();
    registry
        .register(SLEEP, || Box::new(SleepOperator::default()))
        .unwrap();
    registry
}

/// 记录执行并输出 `output = { node, seq, inputs }`
///
/// `seq` 是全局执行序号，重复执行同一节点会得到不同的值。
pub struct RecordingOperator {
    log: InvocationLog,
    context: Option<OperatorContext>,
    outputs: HashMap<String, OperatorResult>,
}

impl RecordingOperator {
    pub fn new(log: InvocationLog) -> Self {
        Self {
            log,
            context: None,
            outputs: HashMap::new(),
        }
    }
}

#[async_trait]
impl Operator for RecordingOperator {
    fn init(&mut self, context: OperatorContext) -> SchedulerResult<()> {
        self.context = Some(context);
        Ok(())
    }

    async fn execute(&mut self) -> SchedulerResult<()> {
        let context = self
            .context
            .as_ref()
            .ok_or_else(|| SchedulerError::Internal("RecordingOperator 未初始化".into()))?;
        let seq = self.log.record(context.node_name());

        let mut inputs = serde_json::Map::new();
        for (key, value) in &context.inputs {
            inputs.insert(key.clone(), value.to_json()?);
        }
        self.outputs.insert(
            "output".to_string(),
            OperatorResult::json(json!({
                "node": context.node_name(),
                "seq": seq,
                "inputs": inputs,
            })),
        );
        Ok(())
    }

    fn outputs(&self) -> HashMap<String, OperatorResult> {
        self.outputs.clone()
    }
}

/// 输出 `params.value`（没有时输出全部参数）；`params.anomalies` 存在时同时输出异常列表
#[derive(Default)]
pub struct ConstantOperator {
    outputs: HashMap<String, OperatorResult>,
}

#[async_trait]
impl Operator for ConstantOperator {
    fn init(&mut self, context: OperatorContext) -> SchedulerResult<()> {
        let params = &context.plan_node.params;
        let value = params
            .get("value")
            .cloned()
            .unwrap_or_else(|| Value::Object(params.clone()));
        self.outputs
            .insert("output".to_string(), OperatorResult::json(value));

        if let Some(anomalies) = params.get("anomalies") {
            let anomalies: Vec<Anomaly> = serde_json::from_value(anomalies.clone())?;
            self.outputs
                .insert("anomalies".to_string(), OperatorResult::anomalies(anomalies));
        }
        Ok(())
    }

    async fn execute(&mut self) -> SchedulerResult<()> {
        Ok(())
    }

    fn outputs(&self) -> HashMap<String, OperatorResult> {
        self.outputs.clone()
    }
}

/// 默认执行失败；参数 `fail = false` 时输出 `output = "ok"`
#[derive(Default)]
pub struct FailingOperator {
    fail: bool,
    message: String,
    outputs: HashMap<String, OperatorResult>,
}

#[async_trait]
impl Operator for FailingOperator {
    fn init(&mut self, context: OperatorContext) -> SchedulerResult<()> {
        self.fail = context
            .param("fail")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        self.message = context
            .param("message")
            .and_then(Value::as_str)
            .unwrap_or("scripted failure")
            .to_string();
        Ok(())
    }

    async fn execute(&mut self) -> SchedulerResult<()> {
        if self.fail {
            return Err(SchedulerError::TaskExecution(self.message.clone()));
        }
        self.outputs
            .insert("output".to_string(), OperatorResult::json(json!("ok")));
        Ok(())
    }

    fn outputs(&self) -> HashMap<String, OperatorResult> {
        self.outputs.clone()
    }
}

/// 执行成功但不产生任何输出
pub struct SilentOperator;

#[async_trait]
impl Operator for SilentOperator {
    fn init(&mut self, _context: OperatorContext) -> SchedulerResult<()> {
        Ok(())
    }

    async fn execute(&mut self) -> SchedulerResult<()> {
        Ok(())
    }

    fn outputs(&self) -> HashMap<String, OperatorResult> {
        HashMap::new()
    }
}

/// 睡眠 `params.sleepMs`（默认 1000ms）后输出 `output = "slept"`
#[derive(Default)]
pub struct SleepOperator {
    duration: Duration,
    done: bool,
}

#[async_trait]
impl Operator for SleepOperator {
    fn init(&mut self, context: OperatorContext) -> SchedulerResult<()> {
        let millis = context
            .param("sleepMs")
            .and_then(Value::as_u64)
            .unwrap_or(1000);
        self.duration = Duration::from_millis(millis);
        Ok(())
    }

    async fn execute(&mut self) -> SchedulerResult<()> {
        tokio::time::sleep(self.duration).await;
        self.done = true;
        Ok(())
    }

    fn outputs(&self) -> HashMap<String, OperatorResult> {
        let mut outputs = HashMap::new();
        if self.done {
            outputs.insert("output".to_string(), OperatorResult::json(json!("slept")));
        }
        outputs
    }
}

/// 包装真实存储的任务存储
///
/// 记录每次拉取的 `ascending` 参数；`fail_fetches(n)` / `fail_acquires(n)` 让接下来
/// n 次对应调用返回数据库错误，其余调用原样转发给内部存储。
pub struct ScriptedTaskStore {
    inner: Arc<dyn TaskStore>,
    fetch_orders: Mutex<Vec<bool>>,
    failing_fetches: AtomicUsize,
    failing_acquires: AtomicUsize,
}

impl ScriptedTaskStore {
    pub fn new(inner: Arc<dyn TaskStore>) -> Self {
        Self {
            inner,
            fetch_orders: Mutex::new(Vec::new()),
            failing_fetches: AtomicUsize::new(0),
            failing_acquires: AtomicUsize::new(0),
        }
    }

    pub fn fail_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    pub fn fail_acquires(&self, count: usize) {
        self.failing_acquires.store(count, Ordering::SeqCst);
    }

    /// 按调用顺序记录的 `ascending` 参数，包括注入失败的调用
    pub fn fetch_orders(&self) -> Vec<bool> {
        self.fetch_orders.lock().unwrap().clone()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TaskStore for ScriptedTaskStore {
    async fn create(&self, task: NewTask) -> SchedulerResult<Task> {
        self.inner.create(task).await
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        self.inner.get_by_id(id).await
    }

    async fn find_waiting_ordered_by_create_time(
        &self,
        limit: usize,
        ascending: bool,
    ) -> SchedulerResult<Vec<Task>> {
        self.fetch_orders.lock().unwrap().push(ascending);
        if Self::take_failure(&self.failing_fetches) {
            return Err(SchedulerError::database_error("模拟的任务拉取失败"));
        }
        self.inner
            .find_waiting_ordered_by_create_time(limit, ascending)
            .await
    }

    async fn try_acquire(
        &self,
        worker_id: i64,
        task_id: i64,
        allowed_prior: &[TaskStatus],
        expected_version: i32,
    ) -> SchedulerResult<bool> {
        if Self::take_failure(&self.failing_acquires) {
            return Err(SchedulerError::database_error("模拟的租约获取失败"));
        }
        self.inner
            .try_acquire(worker_id, task_id, allowed_prior, expected_version)
            .await
    }

    async fn complete_with_status(
        &self,
        task_id: i64,
        expected_prior: TaskStatus,
        new_status: TaskStatus,
        end_time_millis: i64,
        message: Option<String>,
    ) -> SchedulerResult<bool> {
        self.inner
            .complete_with_status(task_id, expected_prior, new_status, end_time_millis, message)
            .await
    }

    async fn touch_heartbeat(&self, task_id: i64) -> SchedulerResult<()> {
        self.inner.touch_heartbeat(task_id).await
    }

    async fn find_running_owned_by(&self, worker_id: i64) -> SchedulerResult<Vec<Task>> {
        self.inner.find_running_owned_by(worker_id).await
    }

    async fn find_running_inactive_since(
        &self,
        threshold: DateTime<Utc>,
    ) -> SchedulerResult<Vec<Task>> {
        self.inner.find_running_inactive_since(threshold).await
    }
}
