use std::sync::Arc;

use anomaly_core::{AppConfig, TaskStore, TaskType, WorkerIdentity};
use anomaly_infrastructure::create_task_store;
use anomaly_pipeline::{OperatorRegistry, PlanExecutor};
use anomaly_worker::{
    DetectionTaskRunner, MonitorTaskRunner, OnboardingTaskRunner, TaskDriver, TaskRunner,
    TaskRunnerRegistry,
};
use anyhow::{Context, Result};
use tracing::info;

/// 组合根：构造存储、算子注册表、计划执行器、任务执行器和任务驱动器
pub struct Application {
    config: AppConfig,
    store: Arc<dyn TaskStore>,
    executor: PlanExecutor,
    driver: TaskDriver,
}

impl Application {
    /// 按配置创建任务存储并装配所有组件
    pub async fn build(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let store = create_task_store(&config.database)
            .await
            .context("初始化任务存储失败")?;
        ApplicationBuilder::new(config, store).build()
    }

    pub fn builder(config: AppConfig, store: Arc<dyn TaskStore>) -> ApplicationBuilder {
        ApplicationBuilder::new(config, store)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        Arc::clone(&self.store)
    }

    pub fn executor(&self) -> &PlanExecutor {
        &self.executor
    }

    pub fn driver(&self) -> &TaskDriver {
        &self.driver
    }

    pub fn worker_id(&self) -> i64 {
        self.driver.worker_id()
    }

    pub async fn start(&self) -> Result<()> {
        self.driver.start().await.context("启动任务驱动器失败")?;
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.driver.shutdown().await;
    }
}

/// 允许替换算子注册表、追加任务执行器或固定 Worker 身份
pub struct ApplicationBuilder {
    config: AppConfig,
    store: Arc<dyn TaskStore>,
    operators: OperatorRegistry,
    extra_runners: Vec<(TaskType, Arc<dyn TaskRunner>)>,
    identity: Option<WorkerIdentity>,
}

impl ApplicationBuilder {
    pub fn new(config: AppConfig, store: Arc<dyn TaskStore>) -> Self {
        Self {
            config,
            store,
            operators: OperatorRegistry::with_builtins(),
            extra_runners: Vec::new(),
            identity: None,
        }
    }

    pub fn with_operators(mut self, operators: OperatorRegistry) -> Self {
        self.operators = operators;
        self
    }

    /// 注册额外的任务执行器，例如通知任务
    pub fn with_runner(mut self, task_type: TaskType, runner: Arc<dyn TaskRunner>) -> Self {
        self.extra_runners.push((task_type, runner));
        self
    }

    pub fn with_identity(mut self, identity: WorkerIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn build(self) -> Result<Application> {
        let ApplicationBuilder {
            config,
            store,
            operators,
            extra_runners,
            identity,
        } = self;

        let worker_config = config.worker.clone();
        let executor = PlanExecutor::new(Arc::new(operators), worker_config.max_parallel_tasks);

        let mut runners = TaskRunnerRegistry::new()
            .with_runner(
                TaskType::Detection,
                Arc::new(DetectionTaskRunner::new(executor.clone())),
            )
            .with_runner(
                TaskType::Onboarding,
                Arc::new(OnboardingTaskRunner::new(executor.clone())),
            )
            .with_runner(
                TaskType::Monitor,
                Arc::new(
                    MonitorTaskRunner::new(
                        Arc::clone(&store),
                        worker_config.stale_lease_threshold(),
                    )
                    .with_heartbeat_interval(worker_config.heartbeat_interval()),
                ),
            );
        for (task_type, runner) in extra_runners {
            runners.register(task_type, runner);
        }
        info!("已注册任务类型: {:?}", runners.task_types());
        info!("已注册组件类型: {:?}", executor.registry().component_types());

        let runners = Arc::new(runners);
        let driver = match identity {
            Some(identity) => {
                worker_config.validate()?;
                TaskDriver::with_identity(identity, worker_config, Arc::clone(&store), runners)
            }
            None => TaskDriver::new(worker_config, Arc::clone(&store), runners)?,
        };

        Ok(Application {
            config,
            store,
            executor,
            driver,
        })
    }
}
