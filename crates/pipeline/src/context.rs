use std::collections::{HashMap, HashSet};
use std::fmt;

use anomaly_core::{SchedulerError, SchedulerResult};

use crate::operator::OperatorResult;

/// 节点名与输出键之间的分隔符，节点名中不允许出现
pub const CONTEXT_KEY_SEPARATOR: char = '#';

/// 执行上下文的键 `(node, output_key)`
///
/// 字符串形式为 `node#key`。节点名不含分隔符，解码时在第一个分隔符处切分，
/// 因此输出键本身可以包含 `#`，编码和解码互为逆运算。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    node: String,
    key: String,
}

impl ContextKey {
    pub fn new(node: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            key: key.into(),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn encode(&self) -> String {
        format!("{}{}{}", self.node, CONTEXT_KEY_SEPARATOR, self.key)
    }

    pub fn decode(encoded: &str) -> SchedulerResult<Self> {
        encoded
            .split_once(CONTEXT_KEY_SEPARATOR)
            .map(|(node, key)| Self::new(node, key))
            .ok_or_else(|| SchedulerError::Internal(format!("无效的上下文键: {encoded}")))
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.node, CONTEXT_KEY_SEPARATOR, self.key)
    }
}

/// 一次 DAG 执行的备忘表
///
/// 除了结果本身还记录已执行过的节点：节点执行过但没有产出某个声明的键时，
/// 依赖它的节点直接得到缺键错误，而不是再执行一遍。
#[derive(Debug, Default)]
pub struct ExecutionContext {
    results: HashMap<ContextKey, OperatorResult>,
    executed: HashSet<String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &ContextKey) -> bool {
        self.results.contains_key(key)
    }

    pub fn get(&self, key: &ContextKey) -> Option<&OperatorResult> {
        self.results.get(key)
    }

    /// 写入结果，已存在的键保持原值
    pub fn insert(&mut self, key: ContextKey, value: OperatorResult) {
        self.results.entry(key).or_insert(value);
    }

    pub fn is_executed(&self, node: &str) -> bool {
        self.executed.contains(node)
    }

    pub fn mark_executed(&mut self, node: impl Into<String>) {
        self.executed.insert(node.into());
    }

    /// 取出某个节点的全部输出，键为 output key
    pub fn outputs_of(&self, node: &str) -> HashMap<String, OperatorResult> {
        self.results
            .iter()
            .filter(|(key, _)| key.node() == node)
            .map(|(key, value)| (key.key().to_string(), value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
