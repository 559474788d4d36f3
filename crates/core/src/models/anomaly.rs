use serde::{Deserialize, Serialize};

/// 检测算子产出的单个异常区间
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    /// 区间起点（epoch 毫秒，含）
    pub start_time: i64,
    /// 区间终点（epoch 毫秒，不含）
    pub end_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    pub current: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Anomaly {
    pub fn new(start_time: i64, end_time: i64, current: f64) -> Self {
        Self {
            start_time,
            end_time,
            metric: None,
            current,
            baseline: None,
            score: None,
        }
    }

    pub fn with_baseline(mut self, baseline: f64) -> Self {
        self.baseline = Some(baseline);
        self
    }

    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = Some(metric.into());
        self
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_time - self.start_time
    }
}
