use serde::{Deserialize, Serialize};

/// 检测计划中的一个节点定义
///
/// 节点名在计划内唯一；`inputs` 的边连同所有节点构成必须无环的有向图，
/// 这一点由 `anomaly-pipeline` 的计划校验在执行前保证。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanNodeSpec {
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub inputs: Vec<InputBinding>,
    #[serde(default)]
    pub outputs: Vec<OutputBinding>,
}

impl PlanNodeSpec {
    pub fn new(name: impl Into<String>, component_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            component_type: component_type.into(),
            params: serde_json::Map::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// 该节点直接依赖的上游节点名（按声明顺序，可能重复）
    pub fn upstream_nodes(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|input| input.source_plan_node.as_str())
    }
}

/// 输入边: 把 `(source_plan_node, source_property)` 的结果绑定到本节点的 `target_property`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InputBinding {
    pub source_plan_node: String,
    pub source_property: String,
    pub target_property: String,
}

impl InputBinding {
    pub fn new(
        source_plan_node: impl Into<String>,
        source_property: impl Into<String>,
        target_property: impl Into<String>,
    ) -> Self {
        Self {
            source_plan_node: source_plan_node.into(),
            source_property: source_property.into(),
            target_property: target_property.into(),
        }
    }
}

/// 输出声明: 算子输出 `output_key` 对外暴露为 `output_name`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutputBinding {
    pub output_key: String,
    pub output_name: String,
}
