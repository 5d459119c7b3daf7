//! 分配管理器
//!
//! 持有医生↔检查的分配关系，驱动状态模型转换。
//! 任何修改 `status`/`assigned_doctor_id` 的操作都串行化在
//! 每检查互斥门之内；跨检查的请求完全并行，不存在全局锁。

use chrono::Utc;
use ris_core::{
    Actor, AssignmentAction, AssignmentRecord, AssignmentResult, Priority, Result, RisError,
    StatusEvent, Study, WorkflowStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::notifier::{EventKind, WorkflowEvent};
use crate::registry::StudyRegistry;
use crate::status_model::StatusModel;

/// 每检查互斥门
///
/// `inflight_assigns` 跟踪同一检查上重叠的分配请求数，
/// 配合 `settled` 让竞争各方收敛到最终提交的医生。
#[derive(Debug, Default)]
struct StudyGate {
    lock: Mutex<()>,
    inflight_assigns: AtomicUsize,
    settled: Notify,
}

/// 分配管理器
#[derive(Debug)]
pub struct AssignmentManager {
    registry: Arc<StudyRegistry>,
    gates: Mutex<HashMap<Uuid, Arc<StudyGate>>>,
}

impl AssignmentManager {
    pub fn new(registry: Arc<StudyRegistry>) -> Self {
        Self {
            registry,
            gates: Mutex::new(HashMap::new()),
        }
    }

    async fn gate(&self, study_id: Uuid) -> Arc<StudyGate> {
        let mut gates = self.gates.lock().await;
        gates.entry(study_id).or_default().clone()
    }

    /// 分配或重新分配检查给医生
    ///
    /// 已定稿（及之后）的检查拒绝分配。重叠的并发分配请求串行提交，
    /// 最后提交者胜出；先提交的一方不收到错误，而是在结果中拿到
    /// 最终生效的医生，供调用方直接对账UI状态。
    pub async fn assign(
        &self,
        study_id: Uuid,
        doctor_id: Uuid,
        actor: Actor,
        note: Option<String>,
        priority_override: Option<Priority>,
    ) -> Result<(AssignmentResult, WorkflowEvent)> {
        let doctor = self.registry.get_doctor(doctor_id).await?;
        if !doctor.is_active {
            return Err(RisError::Validation(format!(
                "Doctor {} is not active",
                doctor_id
            )));
        }

        let gate = self.gate(study_id).await;
        gate.inflight_assigns.fetch_add(1, Ordering::SeqCst);

        let committed = self
            .commit_assignment(&gate, study_id, doctor_id, actor, note, priority_override)
            .await;

        // 提交成败都要释放在飞计数，最后一个离开者唤醒等待方
        let remaining = gate.inflight_assigns.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            gate.settled.notify_waiters();
        }

        let (mut result, event) = committed?;

        // 等同一检查上重叠的分配全部落定，再回读最终医生
        loop {
            let notified = gate.settled.notified();
            if gate.inflight_assigns.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }

        let settled = self.registry.get(study_id).await?;
        if let Some(final_doctor) = settled.assigned_doctor_id {
            if final_doctor != result.assigned_doctor_id {
                tracing::info!(
                    "Assignment race on study {}: reconciling to final doctor {}",
                    study_id,
                    final_doctor
                );
            }
            result.assigned_doctor_id = final_doctor;
            result.status = settled.status;
        }

        Ok((result, event))
    }

    async fn commit_assignment(
        &self,
        gate: &StudyGate,
        study_id: Uuid,
        doctor_id: Uuid,
        actor: Actor,
        note: Option<String>,
        priority_override: Option<Priority>,
    ) -> Result<(AssignmentResult, WorkflowEvent)> {
        let _guard = gate.lock.lock().await;

        let study = self.registry.get(study_id).await?;
        if StatusModel::rank(study.status) >= StatusModel::rank(WorkflowStatus::ReportFinalized) {
            return Err(RisError::InvalidTransition {
                from: format!("{:?}", study.status),
                to: format!("{:?}", WorkflowStatus::AssignedToDoctor),
            });
        }

        // assign 与 reassign 是同一入口，区分只为审计展示
        let action = if study.assigned_doctor_id.is_some() {
            AssignmentAction::Reassign
        } else {
            AssignmentAction::Assign
        };

        let now = Utc::now();
        let previous_status = study.status;
        let new_status = match previous_status {
            WorkflowStatus::NewStudyReceived | WorkflowStatus::PendingAssignment => {
                WorkflowStatus::AssignedToDoctor
            }
            // 重新分配保持当前状态（含 report_in_progress）
            other => other,
        };

        let updated = self
            .registry
            .with_study_mut(study_id, |study| {
                if let Some(priority) = priority_override {
                    study.priority = priority;
                }
                study.assignment_history.push(AssignmentRecord {
                    doctor_id,
                    assigned_at: now,
                    assigned_by: actor.id,
                    note: note.clone(),
                    action,
                });
                study.assigned_doctor_id = Some(doctor_id);
                study.status = new_status;
                // 首次分配时间只记一次
                if study.assigned_at.is_none() {
                    study.assigned_at = Some(now);
                }
                Ok(study.clone())
            })
            .await?;

        let event = self
            .record_transition(&updated, previous_status, actor, EventKind::AssignmentChanged)
            .await;

        tracing::info!(
            "Study {} {:?} to doctor {} by actor {}",
            study_id,
            action,
            doctor_id,
            actor.id
        );

        Ok((
            AssignmentResult {
                study_id,
                assigned_doctor_id: doctor_id,
                status: new_status,
                action,
                assigned_at: now,
            },
            event,
        ))
    }

    /// 医生开始撰写报告
    pub async fn start_report(
        &self,
        study_id: Uuid,
        doctor_id: Uuid,
        actor: Actor,
    ) -> Result<WorkflowEvent> {
        let gate = self.gate(study_id).await;
        let _guard = gate.lock.lock().await;

        let study = self.registry.get(study_id).await?;
        self.check_owner(&study, doctor_id)?;
        StatusModel::check_transition(study.status, WorkflowStatus::ReportInProgress)?;

        let now = Utc::now();
        let previous_status = study.status;
        let updated = self
            .registry
            .with_study_mut(study_id, |study| {
                study.status = WorkflowStatus::ReportInProgress;
                if study.report_started_at.is_none() {
                    study.report_started_at = Some(now);
                }
                Ok(study.clone())
            })
            .await?;

        tracing::info!("Doctor {} started report for study {}", doctor_id, study_id);
        Ok(self
            .record_transition(&updated, previous_status, actor, EventKind::StatusChanged)
            .await)
    }

    /// 医生定稿报告；定稿之后该检查不再接受分配
    pub async fn finalize(
        &self,
        study_id: Uuid,
        doctor_id: Uuid,
        actor: Actor,
    ) -> Result<WorkflowEvent> {
        let gate = self.gate(study_id).await;
        let _guard = gate.lock.lock().await;

        let study = self.registry.get(study_id).await?;
        self.check_owner(&study, doctor_id)?;
        StatusModel::check_transition(study.status, WorkflowStatus::ReportFinalized)?;

        let now = Utc::now();
        let previous_status = study.status;
        let updated = self
            .registry
            .with_study_mut(study_id, |study| {
                study.status = WorkflowStatus::ReportFinalized;
                if study.report_finalized_at.is_none() {
                    study.report_finalized_at = Some(now);
                }
                Ok(study.clone())
            })
            .await?;

        tracing::info!("Doctor {} finalized report for study {}", doctor_id, study_id);
        Ok(self
            .record_transition(&updated, previous_status, actor, EventKind::StatusChanged)
            .await)
    }

    /// 通用状态推进（下载/归档路径）
    ///
    /// 下载类目标状态首次到达时记录 `downloaded_at`。
    pub async fn apply_transition(
        &self,
        study_id: Uuid,
        target: WorkflowStatus,
        actor: Actor,
    ) -> Result<WorkflowEvent> {
        let gate = self.gate(study_id).await;
        let _guard = gate.lock.lock().await;

        let study = self.registry.get(study_id).await?;
        StatusModel::check_transition(study.status, target)?;

        let now = Utc::now();
        let previous_status = study.status;
        let updated = self
            .registry
            .with_study_mut(study_id, |study| {
                study.status = target;
                let is_download = matches!(
                    target,
                    WorkflowStatus::ReportDownloaded
                        | WorkflowStatus::ReportDownloadedRadiologist
                        | WorkflowStatus::FinalReportDownloaded
                );
                if is_download && study.downloaded_at.is_none() {
                    study.downloaded_at = Some(now);
                }
                Ok(study.clone())
            })
            .await?;

        tracing::info!(
            "Study {} transitioned {:?} -> {:?} by actor {}",
            study_id,
            previous_status,
            target,
            actor.id
        );
        Ok(self
            .record_transition(&updated, previous_status, actor, EventKind::StatusChanged)
            .await)
    }

    /// 标记未授权：无视当前秩强制归档（引擎唯一的另一处受认可回退）
    ///
    /// 引擎不提供逆操作，该动作不可逆。
    pub async fn mark_unauthorized(
        &self,
        study_id: Uuid,
        reason: &str,
        actor: Actor,
    ) -> Result<WorkflowEvent> {
        if reason.trim().is_empty() {
            return Err(RisError::Validation(
                "Unauthorized marking requires a non-empty reason".to_string(),
            ));
        }

        let gate = self.gate(study_id).await;
        let _guard = gate.lock.lock().await;

        let study = self.registry.get(study_id).await?;
        let previous_status = study.status;
        let updated = self
            .registry
            .with_study_mut(study_id, |study| {
                study.status = WorkflowStatus::Archived;
                study.unauthorized_reason = Some(reason.to_string());
                Ok(study.clone())
            })
            .await?;

        tracing::warn!(
            "Study {} marked unauthorized ({}) from {:?} by actor {}",
            study_id,
            reason,
            previous_status,
            actor.id
        );
        Ok(self
            .record_transition(&updated, previous_status, actor, EventKind::StatusChanged)
            .await)
    }

    fn check_owner(&self, study: &Study, doctor_id: Uuid) -> Result<()> {
        if study.assigned_doctor_id != Some(doctor_id) {
            return Err(RisError::Unauthorized(format!(
                "Doctor {} is not the assigned owner of study {}",
                doctor_id, study.id
            )));
        }
        Ok(())
    }

    async fn record_transition(
        &self,
        study: &Study,
        previous_status: WorkflowStatus,
        actor: Actor,
        kind: EventKind,
    ) -> WorkflowEvent {
        let at = Utc::now();
        self.registry
            .record_event(StatusEvent {
                study_id: study.id,
                previous_status,
                new_status: study.status,
                at,
                actor,
            })
            .await;

        WorkflowEvent {
            kind,
            study_id: study.id,
            previous_status,
            new_status: study.status,
            at,
            actor,
            assigned_doctor_id: study.assigned_doctor_id,
            origin_location: study.origin_location.clone(),
        }
    }
}
