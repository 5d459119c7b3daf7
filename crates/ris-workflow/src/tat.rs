//! 周转时间（TAT）核算
//!
//! 基于检查记录上的里程碑时间戳计算整分钟周转时长。
//! 三个指标的锚点语义各自独立，不可互相替代：
//! S→R 以采集时间 `acquired_at` 为锚（`billed_on_study_date` 不参与），
//! U→R 以上传时间为锚，A→R 以首次分配时间为锚。

use chrono::{DateTime, Utc};
use ris_core::Study;
use serde::{Deserialize, Serialize};

/// TAT核算结果
///
/// 任一端点时间戳缺失时对应指标为 `None`。
/// 数值为原始整分钟数，展示格式化交给表现层。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TatReport {
    /// 采集 → 报告定稿
    pub study_to_report_minutes: Option<i64>,
    /// 上传 → 报告定稿
    pub upload_to_report_minutes: Option<i64>,
    /// 分配 → 报告定稿
    pub assign_to_report_minutes: Option<i64>,
}

/// TAT核算器
#[derive(Debug, Default)]
pub struct TatAccountant;

impl TatAccountant {
    /// 计算一条检查记录的全部TAT指标
    pub fn compute(study: &Study) -> TatReport {
        let finalized = study.report_finalized_at;
        TatReport {
            study_to_report_minutes: minutes_between(study.acquired_at, finalized),
            upload_to_report_minutes: minutes_between(Some(study.uploaded_at), finalized),
            assign_to_report_minutes: minutes_between(study.assigned_at, finalized),
        }
    }
}

/// 两个里程碑之间的整分钟数，任一端点缺失返回 `None`
pub fn minutes_between(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Option<i64> {
    match (start, end) {
        (Some(start), Some(end)) => Some(end.signed_duration_since(start).num_minutes()),
        _ => None,
    }
}

/// 展示格式化："<n> Min"
pub fn format_minutes(minutes: i64) -> String {
    format!("{} Min", minutes)
}
