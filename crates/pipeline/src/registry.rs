use std::collections::HashMap;
use std::sync::Arc;

use anomaly_core::{SchedulerError, SchedulerResult};

use crate::fork_join::{
    CollectCombiner, ForkJoinOperator, StaticEnumerator, COLLECT_COMBINER, FORK_JOIN,
    STATIC_ENUMERATOR,
};
use crate::operator::Operator;

/// 算子构造函数
pub type OperatorFactory = Arc<dyn Fn() -> Box<dyn Operator> + Send + Sync>;

/// 组件类型名 → 算子构造函数
///
/// 进程启动时一次性填充，之后以 `Arc<OperatorRegistry>` 只读共享。
#[derive(Clone, Default)]
pub struct OperatorRegistry {
    factories: HashMap<String, OperatorFactory>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预注册 fork-join 相关的内置算子
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.insert(FORK_JOIN, || Box::new(ForkJoinOperator::default()));
        registry.insert(STATIC_ENUMERATOR, || Box::new(StaticEnumerator::default()));
        registry.insert(COLLECT_COMBINER, || Box::new(CollectCombiner::default()));
        registry
    }

    /// 注册组件类型，重复注册返回配置错误
    pub fn register<F>(&mut self, component_type: impl Into<String>, factory: F) -> SchedulerResult<()>
    where
        F: Fn() -> Box<dyn Operator> + Send + Sync + 'static,
    {
        let component_type = component_type.into();
        if self.factories.contains_key(&component_type) {
            return Err(SchedulerError::config_error(format!(
                "组件类型已注册: {component_type}"
            )));
        }
        self.insert(component_type, factory);
        Ok(())
    }

    fn insert<F>(&mut self, component_type: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Operator> + Send + Sync + 'static,
    {
        self.factories
            .insert(component_type.into(), Arc::new(factory));
    }

    pub fn create(&self, component_type: &str) -> SchedulerResult<Box<dyn Operator>> {
        self.factories
            .get(component_type)
            .map(|factory| factory())
            .ok_or_else(|| SchedulerError::UnknownComponentType(component_type.to_string()))
    }

    pub fn contains(&self, component_type: &str) -> bool {
        self.factories.contains_key(component_type)
    }

    pub fn component_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("component_types", &self.component_types())
            .finish()
    }
}
