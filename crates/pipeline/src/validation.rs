use std::collections::{BTreeSet, HashMap, VecDeque};

use anomaly_core::{PlanNodeSpec, SchedulerError, SchedulerResult};

use crate::context::CONTEXT_KEY_SEPARATOR;
use crate::fork_join::FORK_JOIN;

/// `ForkJoin` 通过参数引用的节点
const FORK_JOIN_REFERENCES: [&str; 3] = ["enumerator", "root", "combiner"];

/// 节点的全部依赖：输入边的来源，加上 `ForkJoin` 参数引用的节点（去重）
///
/// `ForkJoin` 执行时会运行它引用的节点，这些引用和输入边一样参与环检测。
fn dependencies(node: &PlanNodeSpec) -> BTreeSet<&str> {
    let mut deps: BTreeSet<&str> = node.upstream_nodes().collect();
    if node.component_type == FORK_JOIN {
        deps.extend(
            FORK_JOIN_REFERENCES
                .iter()
                .filter_map(|key| node.params.get(*key).and_then(|v| v.as_str())),
        );
    }
    deps
}

/// 执行前的计划校验
///
/// 执行器本身假设计划是无环的，所以所有计划在进入执行器前都要经过这里。
pub struct PlanValidator;

impl PlanValidator {
    /// 校验节点列表并返回按名称索引的计划
    pub fn validate(
        nodes: &[PlanNodeSpec],
        root: &str,
    ) -> SchedulerResult<HashMap<String, PlanNodeSpec>> {
        if nodes.is_empty() {
            return Err(SchedulerError::invalid_plan("计划没有任何节点"));
        }

        let mut plan = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if node.name.is_empty() {
                return Err(SchedulerError::invalid_plan("节点名不能为空"));
            }
            if node.name.contains(CONTEXT_KEY_SEPARATOR) {
                return Err(SchedulerError::invalid_plan(format!(
                    "节点名不能包含 '{CONTEXT_KEY_SEPARATOR}': {}",
                    node.name
                )));
            }
            if plan.insert(node.name.clone(), node.clone()).is_some() {
                return Err(SchedulerError::invalid_plan(format!(
                    "重复的节点名: {}",
                    node.name
                )));
            }
        }

        for node in nodes {
            for source in dependencies(node) {
                if !plan.contains_key(source) {
                    return Err(SchedulerError::invalid_plan(format!(
                        "节点 {} 引用了不存在的节点 {source}",
                        node.name
                    )));
                }
            }
        }

        if !plan.contains_key(root) {
            return Err(SchedulerError::invalid_plan(format!("根节点不存在: {root}")));
        }

        Self::check_acyclic(&plan)?;

        Ok(plan)
    }

    /// Kahn 拓扑排序，排不完的节点就在环上（或依赖环上的节点）
    fn check_acyclic(plan: &HashMap<String, PlanNodeSpec>) -> SchedulerResult<()> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut queue = VecDeque::new();

        for (name, node) in plan {
            let deps = dependencies(node);
            in_degree.insert(name.as_str(), deps.len());
            for source in deps {
                dependents.entry(source).or_default().push(name.as_str());
            }
        }

        for (&node, &degree) in &in_degree {
            if degree == 0 {
                queue.push_back(node);
            }
        }

        let mut processed_count = 0;
        while let Some(node) = queue.pop_front() {
            processed_count += 1;

            if let Some(children) = dependents.get(node) {
                for &child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(child);
                        }
                    }
                }
            }
        }

        if processed_count < plan.len() {
            let mut remaining: Vec<&str> = in_degree
                .iter()
                .filter(|(_, &degree)| degree > 0)
                .map(|(&node, _)| node)
                .collect();
            remaining.sort_unstable();
            return Err(SchedulerError::CircularDependency(remaining.join(", ")));
        }

        Ok(())
    }
}
