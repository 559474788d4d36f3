//! # Anomaly Pipeline
//!
//! 检测计划的 DAG 执行：算子契约、组件注册表、计划校验、执行上下文和 fork-join。

pub mod context;
pub mod executor;
pub mod fork_join;
pub mod operator;
pub mod plan_node;
pub mod registry;
pub mod validation;

pub use context::{ContextKey, ExecutionContext, CONTEXT_KEY_SEPARATOR};
pub use executor::{Plan, PlanExecutor};
pub use fork_join::{
    CollectCombiner, FailurePolicy, ForkJoinOperator, StaticEnumerator, BRANCHES_KEY,
    COLLECT_COMBINER, ENUMERATION_KEY, FORK_JOIN, STATIC_ENUMERATOR,
};
pub use operator::{BranchOutcome, Operator, OperatorContext, OperatorResult, TimeWindow};
pub use plan_node::PlanNode;
pub use registry::{OperatorFactory, OperatorRegistry};
pub use validation::PlanValidator;
