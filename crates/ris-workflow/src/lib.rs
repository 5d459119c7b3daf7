//! # RIS工作流模块
//!
//! 提供放射科检查工作流与分配管理功能，包括：
//! - 状态模型：基于秩的合法转换规则与派生类别
//! - 分配管理器：医生↔检查关系，每检查互斥，无全局锁
//! - 批量操作协调器：逐项独立执行，部分失败如实上报
//! - TAT核算器：里程碑之间的整分钟周转时长
//! - 事件通知器：按角色作用域的尽力而为推送
//! - 工作流服务门面：外部协作方唯一的调用入口

pub mod assignment;
pub mod bulk;
pub mod collaborators;
pub mod config;
pub mod notifier;
pub mod registry;
pub mod service;
pub mod status_model;
pub mod tat;

// 重新导出主要类型
pub use assignment::AssignmentManager;
pub use bulk::{BulkCoordinator, BulkOperation, BulkRequest, CancellationFlag};
pub use collaborators::{
    DispatchGateway, ExportSink, InMemoryReportStore, RecordingDispatchGateway,
    RecordingExportSink, ReportStore,
};
pub use config::{BulkConfig, NotifierConfig, WorkflowConfig};
pub use notifier::{EventKind, EventNotifier, SubscriberScope, WorkflowEvent};
pub use registry::{CategoryCounts, StudyRegistry};
pub use service::WorkflowService;
pub use status_model::StatusModel;
pub use tat::{format_minutes, minutes_between, TatAccountant, TatReport};
