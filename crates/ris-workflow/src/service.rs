//! 工作流服务门面
//!
//! 外部协作方（UI、HTTP层）唯一的调用入口。组合登记表、分配管理器、
//! 批量协调器、TAT核算器和事件通知器；所有按角色的能力检查都集中
//! 在这里，不在调用点分散重复。

use ris_core::{
    Actor, AssignmentRequest, AssignmentResult, BulkOperationResult, Doctor, Priority, Result,
    RisError, Role, StatusEvent, Study, StudyMetadata, WorkflowStatus,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::assignment::AssignmentManager;
use crate::bulk::{BulkCoordinator, BulkOperation, BulkRequest, CancellationFlag};
use crate::collaborators::{DispatchGateway, ExportSink, ReportStore};
use crate::config::WorkflowConfig;
use crate::notifier::{EventKind, EventNotifier, SubscriberScope, WorkflowEvent};
use crate::registry::{CategoryCounts, StudyRegistry};
use crate::tat::{TatAccountant, TatReport};

/// 工作流服务
pub struct WorkflowService {
    config: WorkflowConfig,
    registry: Arc<StudyRegistry>,
    assignment: Arc<AssignmentManager>,
    coordinator: BulkCoordinator,
    notifier: Arc<EventNotifier>,
    report_store: Arc<dyn ReportStore>,
    dispatch: Arc<dyn DispatchGateway>,
    export: Arc<dyn ExportSink>,
}

impl WorkflowService {
    /// 创建工作流服务
    pub fn new(
        config: WorkflowConfig,
        report_store: Arc<dyn ReportStore>,
        dispatch: Arc<dyn DispatchGateway>,
        export: Arc<dyn ExportSink>,
    ) -> Self {
        let registry = Arc::new(StudyRegistry::new());
        let assignment = Arc::new(AssignmentManager::new(registry.clone()));
        let coordinator = BulkCoordinator::new(config.bulk.clone());
        let notifier = Arc::new(EventNotifier::new(config.notifier.channel_capacity));

        Self {
            config,
            registry,
            assignment,
            coordinator,
            notifier,
            report_store,
            dispatch,
            export,
        }
    }

    // ---- 摄取与名册 ----

    /// 摄取通知入口（幂等）
    ///
    /// 重复通知对已存在的检查是无操作；仅首次登记发布新检查事件。
    pub async fn create_or_touch_study(
        &self,
        study_id: Uuid,
        metadata: StudyMetadata,
        actor: Actor,
    ) -> Result<Study> {
        require_role(actor, &[Role::System, Role::Admin])?;

        let (study, created) = self.registry.create_or_touch(study_id, metadata).await?;
        if created {
            self.notifier
                .publish(&WorkflowEvent {
                    kind: EventKind::StudyReceived,
                    study_id,
                    previous_status: WorkflowStatus::NewStudyReceived,
                    new_status: WorkflowStatus::NewStudyReceived,
                    at: study.created_at,
                    actor,
                    assigned_doctor_id: None,
                    origin_location: study.origin_location.clone(),
                })
                .await;
        }
        Ok(study)
    }

    /// 登记或更新医生名册
    pub async fn register_doctor(&self, doctor: Doctor, actor: Actor) -> Result<()> {
        require_role(actor, &[Role::System, Role::Admin])?;
        self.registry.upsert_doctor(doctor).await;
        Ok(())
    }

    /// 更新医生在线信号（由外部会话协作方调用）
    pub async fn set_doctor_presence(
        &self,
        doctor_id: Uuid,
        is_logged_in: bool,
        actor: Actor,
    ) -> Result<()> {
        require_role(actor, &[Role::System])?;
        self.registry.set_doctor_presence(doctor_id, is_logged_in).await
    }

    // ---- 单项变更操作 ----

    /// 分配/重新分配检查给医生
    pub async fn assign(
        &self,
        study_id: Uuid,
        doctor_id: Uuid,
        actor: Actor,
        note: Option<String>,
        priority_override: Option<Priority>,
    ) -> Result<AssignmentResult> {
        require_role(actor, &[Role::Admin])?;
        let (result, event) = self
            .assignment
            .assign(study_id, doctor_id, actor, note, priority_override)
            .await?;
        self.notifier.publish(&event).await;
        Ok(result)
    }

    /// 医生开始撰写报告
    pub async fn start_report(&self, study_id: Uuid, actor: Actor) -> Result<Study> {
        require_role(actor, &[Role::Doctor])?;
        let event = self.assignment.start_report(study_id, actor.id, actor).await?;
        self.notifier.publish(&event).await;
        self.registry.get(study_id).await
    }

    /// 医生定稿报告
    pub async fn finalize(&self, study_id: Uuid, actor: Actor) -> Result<Study> {
        require_role(actor, &[Role::Doctor])?;
        let event = self.assignment.finalize(study_id, actor.id, actor).await?;
        self.notifier.publish(&event).await;
        self.registry.get(study_id).await
    }

    /// 检验科/管理员下载报告
    pub async fn mark_report_downloaded(&self, study_id: Uuid, actor: Actor) -> Result<Study> {
        require_role(actor, &[Role::Admin, Role::LabStaff])?;
        let event = self
            .assignment
            .apply_transition(study_id, WorkflowStatus::ReportDownloaded, actor)
            .await?;
        self.notifier.publish(&event).await;
        self.registry.get(study_id).await
    }

    /// 放射科医生下载报告（与检验科下载路径独立、可并行）
    pub async fn mark_downloaded_by_radiologist(
        &self,
        study_id: Uuid,
        actor: Actor,
    ) -> Result<Study> {
        require_role(actor, &[Role::Doctor])?;
        let study = self.registry.get(study_id).await?;
        if study.assigned_doctor_id != Some(actor.id) {
            return Err(RisError::Unauthorized(format!(
                "Doctor {} is not the assigned owner of study {}",
                actor.id, study_id
            )));
        }
        let event = self
            .assignment
            .apply_transition(study_id, WorkflowStatus::ReportDownloadedRadiologist, actor)
            .await?;
        self.notifier.publish(&event).await;
        self.registry.get(study_id).await
    }

    /// 最终报告下载
    pub async fn mark_final_downloaded(&self, study_id: Uuid, actor: Actor) -> Result<Study> {
        require_role(actor, &[Role::Admin, Role::LabStaff])?;
        let event = self
            .assignment
            .apply_transition(study_id, WorkflowStatus::FinalReportDownloaded, actor)
            .await?;
        self.notifier.publish(&event).await;
        self.registry.get(study_id).await
    }

    /// 行政归档（任意状态可达的终态）
    pub async fn archive(&self, study_id: Uuid, actor: Actor) -> Result<Study> {
        require_role(actor, &[Role::Admin])?;
        let event = self
            .assignment
            .apply_transition(study_id, WorkflowStatus::Archived, actor)
            .await?;
        self.notifier.publish(&event).await;
        self.registry.get(study_id).await
    }

    /// 标记未授权（强制归档，不可逆）
    pub async fn mark_unauthorized(
        &self,
        study_id: Uuid,
        reason: &str,
        actor: Actor,
    ) -> Result<Study> {
        require_role(actor, &[Role::Admin])?;
        let event = self.assignment.mark_unauthorized(study_id, reason, actor).await?;
        self.notifier.publish(&event).await;
        self.registry.get(study_id).await
    }

    // ---- 批量操作 ----

    /// 批量分配命令入口
    ///
    /// 把瞬态分配命令展开成批量请求，逐项走单项分配的全部校验。
    pub async fn bulk_assign(
        &self,
        request: AssignmentRequest,
        cancel: CancellationFlag,
    ) -> Result<Vec<BulkOperationResult>> {
        let AssignmentRequest {
            study_ids,
            doctor_id,
            priority_override,
            note,
            actor,
        } = request;
        self.bulk(
            BulkRequest {
                operation: BulkOperation::Assign {
                    doctor_id,
                    note,
                    priority_override,
                },
                study_ids,
                actor,
                confirm_large: false,
            },
            cancel,
        )
        .await
    }

    /// 执行批量操作
    ///
    /// 单项错误降级为结果列表项；只有请求形状的验证错误中止整单。
    pub async fn bulk(
        &self,
        request: BulkRequest,
        cancel: CancellationFlag,
    ) -> Result<Vec<BulkOperationResult>> {
        match &request.operation {
            BulkOperation::Assign { .. }
            | BulkOperation::MarkUnauthorized { .. }
            | BulkOperation::DispatchReport => require_role(request.actor, &[Role::Admin])?,
            BulkOperation::ExportRow | BulkOperation::IncludeInZip => {
                require_role(request.actor, &[Role::Admin, Role::LabStaff])?
            }
        }

        let actor = request.actor;
        let deadline = self.config.bulk.collaborator_timeout;

        match request.operation.clone() {
            BulkOperation::Assign {
                doctor_id,
                note,
                priority_override,
            } => {
                let assignment = self.assignment.clone();
                let notifier = self.notifier.clone();
                self.coordinator
                    .run(request, cancel, move |study_id| {
                        let assignment = assignment.clone();
                        let notifier = notifier.clone();
                        let note = note.clone();
                        async move {
                            let (_result, event) = assignment
                                .assign(study_id, doctor_id, actor, note, priority_override)
                                .await?;
                            notifier.publish(&event).await;
                            Ok(())
                        }
                    })
                    .await
            }
            BulkOperation::MarkUnauthorized { reason } => {
                let assignment = self.assignment.clone();
                let notifier = self.notifier.clone();
                self.coordinator
                    .run(request, cancel, move |study_id| {
                        let assignment = assignment.clone();
                        let notifier = notifier.clone();
                        let reason = reason.clone();
                        async move {
                            let event =
                                assignment.mark_unauthorized(study_id, &reason, actor).await?;
                            notifier.publish(&event).await;
                            Ok(())
                        }
                    })
                    .await
            }
            BulkOperation::DispatchReport => {
                let registry = self.registry.clone();
                let report_store = self.report_store.clone();
                let dispatch = self.dispatch.clone();
                self.coordinator
                    .run(request, cancel, move |study_id| {
                        let registry = registry.clone();
                        let report_store = report_store.clone();
                        let dispatch = dispatch.clone();
                        async move {
                            // 未登记的检查直接报 NotFound
                            registry.get(study_id).await?;

                            let available = with_deadline(
                                deadline,
                                format!("report_available for study {}", study_id),
                                report_store.report_available(study_id),
                            )
                            .await?;
                            if !available {
                                // 前置条件不满足：短路，不触发派发调用
                                return Err(RisError::ReportNotAvailable(format!(
                                    "Study {} has no report document",
                                    study_id
                                )));
                            }

                            with_deadline(
                                deadline,
                                format!("dispatch_report for study {}", study_id),
                                dispatch.dispatch_report(study_id),
                            )
                            .await
                        }
                    })
                    .await
            }
            BulkOperation::ExportRow => {
                let registry = self.registry.clone();
                let export = self.export.clone();
                self.coordinator
                    .run(request, cancel, move |study_id| {
                        let registry = registry.clone();
                        let export = export.clone();
                        async move {
                            // 导出只读快照，不占每检查互斥门
                            let study = registry.get(study_id).await?;
                            with_deadline(
                                deadline,
                                format!("export_row for study {}", study_id),
                                export.export_row(&study),
                            )
                            .await
                        }
                    })
                    .await
            }
            BulkOperation::IncludeInZip => {
                let registry = self.registry.clone();
                let export = self.export.clone();
                self.coordinator
                    .run(request, cancel, move |study_id| {
                        let registry = registry.clone();
                        let export = export.clone();
                        async move {
                            let study = registry.get(study_id).await?;
                            with_deadline(
                                deadline,
                                format!("add_to_zip for study {}", study_id),
                                export.add_to_zip(&study),
                            )
                            .await
                        }
                    })
                    .await
            }
        }
    }

    // ---- 只读视图 ----

    /// 检查快照（无锁读取，可能观察到稍旧的分配）
    pub async fn study(&self, study_id: Uuid) -> Result<Study> {
        self.registry.get(study_id).await
    }

    /// 全部检查快照
    pub async fn studies(&self) -> Vec<Study> {
        self.registry.snapshot_all().await
    }

    /// 检查的TAT核算
    pub async fn tat(&self, study_id: Uuid) -> Result<TatReport> {
        let study = self.registry.get(study_id).await?;
        Ok(TatAccountant::compute(&study))
    }

    /// 工作台类别计数
    pub async fn category_counts(&self) -> CategoryCounts {
        self.registry.category_counts().await
    }

    /// 检查的状态事件序列（审计）
    pub async fn events(&self, study_id: Uuid) -> Vec<StatusEvent> {
        self.registry.events_for(study_id).await
    }

    /// 读取医生信息
    pub async fn doctor(&self, doctor_id: Uuid) -> Result<Doctor> {
        self.registry.get_doctor(doctor_id).await
    }

    // ---- 订阅 ----

    /// 按作用域订阅事件
    pub async fn subscribe(
        &self,
        scope: SubscriberScope,
    ) -> (Uuid, mpsc::Receiver<WorkflowEvent>) {
        self.notifier.subscribe(scope).await
    }

    /// 注销订阅
    pub async fn unsubscribe(&self, session_id: Uuid) {
        self.notifier.unsubscribe(session_id).await
    }

    /// 会话的未读新检查计数
    pub async fn unseen_count(&self, session_id: Uuid) -> Option<u64> {
        self.notifier.unseen_count(session_id).await
    }

    /// 确认查看，清零未读计数
    pub async fn acknowledge_view(&self, session_id: Uuid) {
        self.notifier.acknowledge_view(session_id).await
    }
}

fn require_role(actor: Actor, allowed: &[Role]) -> Result<()> {
    if allowed.contains(&actor.role) {
        Ok(())
    } else {
        Err(RisError::Unauthorized(format!(
            "Role {:?} is not permitted to perform this operation",
            actor.role
        )))
    }
}

async fn with_deadline<T>(
    deadline: Duration,
    what: String,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(RisError::CollaboratorTimeout(what)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        InMemoryReportStore, RecordingDispatchGateway, RecordingExportSink,
    };

    fn service() -> (
        WorkflowService,
        Arc<InMemoryReportStore>,
        Arc<RecordingDispatchGateway>,
        Arc<RecordingExportSink>,
    ) {
        let report_store = Arc::new(InMemoryReportStore::new());
        let dispatch = Arc::new(RecordingDispatchGateway::new());
        let export = Arc::new(RecordingExportSink::new());
        let service = WorkflowService::new(
            WorkflowConfig::default(),
            report_store.clone(),
            dispatch.clone(),
            export.clone(),
        );
        (service, report_store, dispatch, export)
    }

    fn admin() -> Actor {
        Actor::new(Uuid::new_v4(), Role::Admin)
    }

    async fn ingest(service: &WorkflowService) -> Uuid {
        let study_id = Uuid::new_v4();
        service
            .create_or_touch_study(study_id, StudyMetadata::default(), Actor::system())
            .await
            .unwrap();
        study_id
    }

    async fn register_doctor(service: &WorkflowService) -> Uuid {
        let doctor_id = Uuid::new_v4();
        service
            .register_doctor(
                Doctor {
                    id: doctor_id,
                    name: "张医生".to_string(),
                    specialization: None,
                    is_active: true,
                    is_logged_in: true,
                },
                admin(),
            )
            .await
            .unwrap();
        doctor_id
    }

    #[tokio::test]
    async fn test_role_checks_are_central() {
        let (service, _, _, _) = service();
        let study_id = ingest(&service).await;
        let doctor_id = register_doctor(&service).await;

        // 医生不能执行分配
        let result = service
            .assign(
                study_id,
                doctor_id,
                Actor::new(doctor_id, Role::Doctor),
                None,
                None,
            )
            .await;
        assert!(matches!(result, Err(RisError::Unauthorized(_))));

        // 检验科不能摄取
        let result = service
            .create_or_touch_study(
                Uuid::new_v4(),
                StudyMetadata::default(),
                Actor::new(Uuid::new_v4(), Role::LabStaff),
            )
            .await;
        assert!(matches!(result, Err(RisError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_priority_override_applied_on_assign() {
        let (service, _, _, _) = service();
        let study_id = ingest(&service).await;
        let doctor_id = register_doctor(&service).await;

        service
            .assign(study_id, doctor_id, admin(), None, Some(Priority::Stat))
            .await
            .unwrap();

        let study = service.study(study_id).await.unwrap();
        assert_eq!(study.priority, Priority::Stat);
        // 优先级与状态正交
        assert_eq!(study.status, WorkflowStatus::AssignedToDoctor);
    }

    #[tokio::test]
    async fn test_bulk_export_takes_snapshot_without_mutation() {
        let (service, _, _, export) = service();
        let study_a = ingest(&service).await;
        let study_b = ingest(&service).await;

        let results = service
            .bulk(
                BulkRequest {
                    operation: BulkOperation::ExportRow,
                    study_ids: vec![study_a, study_b],
                    actor: Actor::new(Uuid::new_v4(), Role::LabStaff),
                    confirm_large: false,
                },
                CancellationFlag::new(),
            )
            .await
            .unwrap();

        assert!(results.iter().all(|r| r.success));
        let mut exported = export.exported_rows().await;
        exported.sort();
        let mut expected = vec![study_a, study_b];
        expected.sort();
        assert_eq!(exported, expected);

        // 导出不改状态
        assert_eq!(
            service.study(study_a).await.unwrap().status,
            WorkflowStatus::NewStudyReceived
        );
    }

    #[tokio::test]
    async fn test_bulk_assign_command_applies_to_all_studies() {
        let (service, _, _, _) = service();
        let study_a = ingest(&service).await;
        let study_b = ingest(&service).await;
        let doctor_id = register_doctor(&service).await;

        let results = service
            .bulk_assign(
                AssignmentRequest {
                    study_ids: vec![study_a, study_b],
                    doctor_id,
                    priority_override: Some(Priority::Urgent),
                    note: Some("夜班批次".to_string()),
                    actor: admin(),
                },
                CancellationFlag::new(),
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        for study_id in [study_a, study_b] {
            let study = service.study(study_id).await.unwrap();
            assert_eq!(study.assigned_doctor_id, Some(doctor_id));
            assert_eq!(study.status, WorkflowStatus::AssignedToDoctor);
            assert_eq!(study.priority, Priority::Urgent);
            assert_eq!(study.assignment_history.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_bulk_zip_records_entries_without_mutation() {
        let (service, _, _, export) = service();
        let study_a = ingest(&service).await;
        let study_b = ingest(&service).await;

        let results = service
            .bulk(
                BulkRequest {
                    operation: BulkOperation::IncludeInZip,
                    study_ids: vec![study_a, study_b],
                    actor: Actor::new(Uuid::new_v4(), Role::LabStaff),
                    confirm_large: false,
                },
                CancellationFlag::new(),
            )
            .await
            .unwrap();

        assert!(results.iter().all(|r| r.success));
        let mut entries = export.zip_entries().await;
        entries.sort();
        let mut expected = vec![study_a, study_b];
        expected.sort();
        assert_eq!(entries, expected);

        // 打包清单不改状态，行导出记录也不混入
        assert!(export.exported_rows().await.is_empty());
        assert_eq!(
            service.study(study_a).await.unwrap().status,
            WorkflowStatus::NewStudyReceived
        );
    }

    #[tokio::test]
    async fn test_doctor_presence_signal_round_trip() {
        let (service, _, _, _) = service();
        let doctor_id = register_doctor(&service).await;
        assert!(service.doctor(doctor_id).await.unwrap().is_logged_in);

        service
            .set_doctor_presence(doctor_id, false, Actor::system())
            .await
            .unwrap();
        assert!(!service.doctor(doctor_id).await.unwrap().is_logged_in);

        // 在线信号只接受系统协作方写入
        let result = service.set_doctor_presence(doctor_id, true, admin()).await;
        assert!(matches!(result, Err(RisError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_downloaded_by_radiologist_requires_ownership() {
        let (service, _, _, _) = service();
        let study_id = ingest(&service).await;
        let doctor_id = register_doctor(&service).await;
        let doctor_actor = Actor::new(doctor_id, Role::Doctor);

        service
            .assign(study_id, doctor_id, admin(), None, None)
            .await
            .unwrap();
        service.start_report(study_id, doctor_actor).await.unwrap();
        service.finalize(study_id, doctor_actor).await.unwrap();

        let stranger = Actor::new(Uuid::new_v4(), Role::Doctor);
        let result = service
            .mark_downloaded_by_radiologist(study_id, stranger)
            .await;
        assert!(matches!(result, Err(RisError::Unauthorized(_))));

        let study = service
            .mark_downloaded_by_radiologist(study_id, doctor_actor)
            .await
            .unwrap();
        assert_eq!(study.status, WorkflowStatus::ReportDownloadedRadiologist);
        assert!(study.downloaded_at.is_some());
    }
}
