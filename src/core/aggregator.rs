//! 汇总所有任务的动作计数

use crate::core::accountant::ActionCounts;
use crate::core::executor::JobResult;
use serde::Serialize;
use tracing::info;

/// 全部任务的合计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrandTotal {
    pub action_counts: ActionCounts,
}

impl GrandTotal {
    pub fn is_empty(&self) -> bool {
        self.action_counts.values().all(|&n| n == 0)
    }

    /// 所有动作的条目总数
    pub fn total_items(&self) -> u64 {
        self.action_counts.values().sum()
    }
}

/// 结果汇总器
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator;

impl ResultAggregator {
    /// 按动作名逐项相加；失败任务也计入它失败前已完成的部分
    pub fn aggregate(results: &[JobResult]) -> GrandTotal {
        let mut total = GrandTotal::default();
        for result in results {
            for (action, count) in &result.action_counts {
                *total.action_counts.entry(action.clone()).or_insert(0) += count;
            }
        }
        total
    }

    /// 输出合计
    pub fn report(total: &GrandTotal) {
        if total.is_empty() {
            info!("No files pending for processing");
            return;
        }

        info!("Grand total of files processed:");
        for (action, count) in &total.action_counts {
            info!("\t{} = {}", action, count);
        }
    }
}
