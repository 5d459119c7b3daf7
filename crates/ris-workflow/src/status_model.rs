//! 检查状态模型
//!
//! 定义合法状态、基于秩（rank）的转换规则和派生类别。

use ris_core::{Result, RisError, StatusCategory, WorkflowStatus};

/// 状态模型
///
/// 转换合法性规则：目标状态秩 ≥ 当前状态秩，或目标为归档，
/// 或是 `assigned_to_doctor` 上的重新分配自转换（秩相同，已被 ≥ 覆盖）。
/// 任何秩回退（如 `report_finalized → assigned_to_doctor`）都被拒绝。
#[derive(Debug, Default)]
pub struct StatusModel;

impl StatusModel {
    /// 状态在生命周期中的秩
    ///
    /// `report_downloaded` 与 `report_downloaded_radiologist` 同秩：
    /// 医生下载路径与检验科/管理员下载路径互相独立，可并行发生。
    pub fn rank(status: WorkflowStatus) -> u8 {
        match status {
            WorkflowStatus::NewStudyReceived => 0,
            WorkflowStatus::PendingAssignment => 1,
            WorkflowStatus::AssignedToDoctor => 2,
            WorkflowStatus::ReportInProgress => 3,
            WorkflowStatus::ReportFinalized => 4,
            WorkflowStatus::ReportDownloaded => 5,
            WorkflowStatus::ReportDownloadedRadiologist => 5,
            WorkflowStatus::FinalReportDownloaded => 6,
            WorkflowStatus::Archived => 7,
        }
    }

    /// 派生类别（工作台计数用，不持久化）
    pub fn category(status: WorkflowStatus) -> StatusCategory {
        match status {
            WorkflowStatus::NewStudyReceived | WorkflowStatus::PendingAssignment => {
                StatusCategory::Pending
            }
            WorkflowStatus::AssignedToDoctor | WorkflowStatus::ReportInProgress => {
                StatusCategory::InProgress
            }
            WorkflowStatus::ReportFinalized
            | WorkflowStatus::ReportDownloaded
            | WorkflowStatus::ReportDownloadedRadiologist
            | WorkflowStatus::FinalReportDownloaded => StatusCategory::Completed,
            WorkflowStatus::Archived => StatusCategory::Archived,
        }
    }

    /// 检查状态转换是否合法
    pub fn can_transition(from: WorkflowStatus, to: WorkflowStatus) -> bool {
        to == WorkflowStatus::Archived || Self::rank(to) >= Self::rank(from)
    }

    /// 校验状态转换，非法则返回 `InvalidTransition`
    pub fn check_transition(from: WorkflowStatus, to: WorkflowStatus) -> Result<()> {
        if Self::can_transition(from, to) {
            Ok(())
        } else {
            Err(RisError::InvalidTransition {
                from: format!("{:?}", from),
                to: format!("{:?}", to),
            })
        }
    }

    /// 获取所有状态
    pub fn all_statuses() -> Vec<WorkflowStatus> {
        vec![
            WorkflowStatus::NewStudyReceived,
            WorkflowStatus::PendingAssignment,
            WorkflowStatus::AssignedToDoctor,
            WorkflowStatus::ReportInProgress,
            WorkflowStatus::ReportFinalized,
            WorkflowStatus::ReportDownloaded,
            WorkflowStatus::ReportDownloadedRadiologist,
            WorkflowStatus::FinalReportDownloaded,
            WorkflowStatus::Archived,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(StatusModel::can_transition(
            WorkflowStatus::NewStudyReceived,
            WorkflowStatus::PendingAssignment
        ));
        assert!(StatusModel::can_transition(
            WorkflowStatus::PendingAssignment,
            WorkflowStatus::AssignedToDoctor
        ));
        assert!(StatusModel::can_transition(
            WorkflowStatus::ReportInProgress,
            WorkflowStatus::ReportFinalized
        ));
        assert!(StatusModel::can_transition(
            WorkflowStatus::ReportFinalized,
            WorkflowStatus::ReportDownloadedRadiologist
        ));
    }

    #[test]
    fn test_backward_transitions_rejected() {
        assert!(!StatusModel::can_transition(
            WorkflowStatus::ReportFinalized,
            WorkflowStatus::AssignedToDoctor
        ));
        assert!(!StatusModel::can_transition(
            WorkflowStatus::ReportDownloaded,
            WorkflowStatus::ReportInProgress
        ));

        let result = StatusModel::check_transition(
            WorkflowStatus::ReportFinalized,
            WorkflowStatus::AssignedToDoctor,
        );
        assert!(matches!(
            result,
            Err(RisError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_reassignment_self_transition() {
        // 重新分配是同秩自转换
        assert!(StatusModel::can_transition(
            WorkflowStatus::AssignedToDoctor,
            WorkflowStatus::AssignedToDoctor
        ));
    }

    #[test]
    fn test_archive_from_any_state() {
        for status in StatusModel::all_statuses() {
            assert!(StatusModel::can_transition(status, WorkflowStatus::Archived));
        }
    }

    #[test]
    fn test_parallel_download_branches() {
        // 两条下载路径同秩，互不阻塞
        assert_eq!(
            StatusModel::rank(WorkflowStatus::ReportDownloaded),
            StatusModel::rank(WorkflowStatus::ReportDownloadedRadiologist)
        );
        assert!(StatusModel::can_transition(
            WorkflowStatus::ReportDownloadedRadiologist,
            WorkflowStatus::ReportDownloaded
        ));
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            StatusModel::category(WorkflowStatus::NewStudyReceived),
            StatusCategory::Pending
        );
        assert_eq!(
            StatusModel::category(WorkflowStatus::ReportInProgress),
            StatusCategory::InProgress
        );
        assert_eq!(
            StatusModel::category(WorkflowStatus::ReportDownloadedRadiologist),
            StatusCategory::Completed
        );
        assert_eq!(
            StatusModel::category(WorkflowStatus::Archived),
            StatusCategory::Archived
        );
    }
}
