//! 核心数据模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 检查工作流状态
///
/// 状态沿既定方向推进，不允许回退；唯二的例外是重新分配
/// （同级自转换）和标记未授权（强制归档）。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    NewStudyReceived,            // 新检查已接收
    PendingAssignment,           // 待分配
    AssignedToDoctor,            // 已分配医生
    ReportInProgress,            // 报告撰写中
    ReportFinalized,             // 报告已定稿
    ReportDownloaded,            // 报告已下载（检验科/管理员路径）
    ReportDownloadedRadiologist, // 报告已下载（放射科医生路径）
    FinalReportDownloaded,       // 最终报告已下载
    Archived,                    // 已归档
}

/// 派生状态类别
///
/// 仅用于工作台计数展示，不做持久化。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
    Pending,
    InProgress,
    Completed,
    Archived,
}

/// 检查优先级
///
/// 优先级与状态正交，只影响展示排序和SLA目标，不影响状态转换。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Routine,
    Urgent,
    Stat,
    Emergency,
}

/// 操作者角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Doctor,
    LabStaff,
    System,
}

/// 操作者
///
/// 身份与角色由外部会话协作方提供，引擎只做授权检查。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    /// 系统操作者（摄取协作方等后台调用使用）
    pub fn system() -> Self {
        Self {
            id: Uuid::nil(),
            role: Role::System,
        }
    }
}

/// 分配动作种类（仅用于审计展示）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AssignmentAction {
    Assign,
    Reassign,
}

/// 分配审计记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub doctor_id: Uuid,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: Uuid,
    pub note: Option<String>,
    pub action: AssignmentAction,
}

/// 检查工作流记录
///
/// 只跟踪检查的工作流位置，不涉及影像像素数据。
/// 时间戳各自至多设置一次，且沿生命周期单调不减。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Study {
    pub id: Uuid,
    pub accession_number: Option<String>, // 检查号（外部引用，可缺失）
    pub modality: Option<String>,
    pub description: Option<String>,
    pub origin_location: Option<String>, // 检查来源机构/地点
    pub priority: Priority,
    pub status: WorkflowStatus,
    pub assigned_doctor_id: Option<Uuid>,
    pub assignment_history: Vec<AssignmentRecord>,
    pub unauthorized_reason: Option<String>,
    pub acquired_at: Option<DateTime<Utc>>, // 采集时间（S→R TAT锚点）
    pub uploaded_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub report_started_at: Option<DateTime<Utc>>,
    pub report_finalized_at: Option<DateTime<Utc>>,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 摄取元数据
///
/// 外部PACS摄取通知携带的检查描述信息。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudyMetadata {
    pub accession_number: Option<String>,
    pub modality: Option<String>,
    pub description: Option<String>,
    pub origin_location: Option<String>,
    pub priority: Option<Priority>,
    pub acquired_at: Option<DateTime<Utc>>,
}

/// 报告医生信息
///
/// `is_logged_in` 为外部会话协作方维护的在线信号，引擎只读。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub name: String,
    pub specialization: Option<String>,
    pub is_active: bool,
    pub is_logged_in: bool,
}

/// 分配请求（瞬态命令对象，不做持久化）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRequest {
    pub study_ids: Vec<Uuid>,
    pub doctor_id: Uuid,
    pub priority_override: Option<Priority>,
    pub note: Option<String>,
    pub actor: Actor,
}

/// 单项分配结果
///
/// `assigned_doctor_id` 为提交后检查上实际生效的医生；
/// 并发分配竞争失败的一方也会在这里拿到胜者的最终值。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentResult {
    pub study_id: Uuid,
    pub assigned_doctor_id: Uuid,
    pub status: WorkflowStatus,
    pub action: AssignmentAction,
    pub assigned_at: DateTime<Utc>,
}

/// 状态变更事件（不可变，只追加）
///
/// 既是TAT推导的依据，也是实时通知的载体。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub study_id: Uuid,
    pub previous_status: WorkflowStatus,
    pub new_status: WorkflowStatus,
    pub at: DateTime<Utc>,
    pub actor: Actor,
}

/// 批量操作单项结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOperationResult {
    pub study_id: Uuid,
    pub success: bool,
    pub error: Option<crate::error::ErrorKind>,
}
