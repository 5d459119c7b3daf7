//! 检查登记表
//!
//! 工作流记录的内存存储：检查记录、医生名册和只追加的状态事件日志。
//! 读取不经过任何每检查互斥门，允许读到稍旧的分配快照。

use chrono::Utc;
use ris_core::{
    Doctor, Result, RisError, StatusEvent, Study, StudyMetadata, WorkflowStatus,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::status_model::StatusModel;

/// 类别计数（工作台展示用）
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CategoryCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub archived: usize,
}

/// 检查登记表
#[derive(Debug, Default)]
pub struct StudyRegistry {
    studies: RwLock<HashMap<Uuid, Study>>,
    doctors: RwLock<HashMap<Uuid, Doctor>>,
    events: RwLock<HashMap<Uuid, Vec<StatusEvent>>>,
}

impl StudyRegistry {
    /// 创建空登记表
    pub fn new() -> Self {
        Self::default()
    }

    /// 摄取通知入口（幂等）
    ///
    /// 对已存在的 `study_id` 是无操作：状态、分配、时间戳全部保持不变。
    /// 返回记录快照和是否为新建。
    pub async fn create_or_touch(
        &self,
        study_id: Uuid,
        metadata: StudyMetadata,
    ) -> Result<(Study, bool)> {
        let mut studies = self.studies.write().await;
        if let Some(existing) = studies.get(&study_id) {
            tracing::debug!("Duplicate ingestion notification for study {}, no-op", study_id);
            return Ok((existing.clone(), false));
        }

        let now = Utc::now();
        let study = Study {
            id: study_id,
            accession_number: metadata.accession_number,
            modality: metadata.modality,
            description: metadata.description,
            origin_location: metadata.origin_location,
            priority: metadata.priority.unwrap_or(ris_core::Priority::Routine),
            status: WorkflowStatus::NewStudyReceived,
            assigned_doctor_id: None,
            assignment_history: Vec::new(),
            unauthorized_reason: None,
            acquired_at: metadata.acquired_at,
            uploaded_at: now,
            assigned_at: None,
            report_started_at: None,
            report_finalized_at: None,
            downloaded_at: None,
            created_at: now,
            updated_at: now,
        };

        studies.insert(study_id, study.clone());
        tracing::info!("Registered study {} as new_study_received", study_id);
        Ok((study, true))
    }

    /// 读取检查快照
    pub async fn get(&self, study_id: Uuid) -> Result<Study> {
        let studies = self.studies.read().await;
        studies
            .get(&study_id)
            .cloned()
            .ok_or_else(|| RisError::NotFound(format!("Study {} not found", study_id)))
    }

    /// 在写锁内修改检查记录
    ///
    /// 状态/分配的互斥由调用方的每检查门保证，这里只负责原子写入。
    pub async fn with_study_mut<T>(
        &self,
        study_id: Uuid,
        f: impl FnOnce(&mut Study) -> Result<T>,
    ) -> Result<T> {
        let mut studies = self.studies.write().await;
        let study = studies
            .get_mut(&study_id)
            .ok_or_else(|| RisError::NotFound(format!("Study {} not found", study_id)))?;
        let out = f(study)?;
        study.updated_at = Utc::now();
        Ok(out)
    }

    /// 追加状态事件
    pub async fn record_event(&self, event: StatusEvent) {
        let mut events = self.events.write().await;
        events.entry(event.study_id).or_default().push(event);
    }

    /// 检查的状态事件序列（按追加顺序）
    pub async fn events_for(&self, study_id: Uuid) -> Vec<StatusEvent> {
        let events = self.events.read().await;
        events.get(&study_id).cloned().unwrap_or_default()
    }

    /// 登记或更新医生
    pub async fn upsert_doctor(&self, doctor: Doctor) {
        let mut doctors = self.doctors.write().await;
        tracing::debug!("Upserting doctor {} ({})", doctor.id, doctor.name);
        doctors.insert(doctor.id, doctor);
    }

    /// 读取医生信息
    pub async fn get_doctor(&self, doctor_id: Uuid) -> Result<Doctor> {
        let doctors = self.doctors.read().await;
        doctors
            .get(&doctor_id)
            .cloned()
            .ok_or_else(|| RisError::NotFound(format!("Doctor {} not found", doctor_id)))
    }

    /// 更新医生在线信号（由外部会话协作方驱动）
    pub async fn set_doctor_presence(&self, doctor_id: Uuid, is_logged_in: bool) -> Result<()> {
        let mut doctors = self.doctors.write().await;
        let doctor = doctors
            .get_mut(&doctor_id)
            .ok_or_else(|| RisError::NotFound(format!("Doctor {} not found", doctor_id)))?;
        doctor.is_logged_in = is_logged_in;
        Ok(())
    }

    /// 所有检查的快照
    pub async fn snapshot_all(&self) -> Vec<Study> {
        let studies = self.studies.read().await;
        studies.values().cloned().collect()
    }

    /// 按派生类别统计检查数
    pub async fn category_counts(&self) -> CategoryCounts {
        let studies = self.studies.read().await;
        let mut counts = CategoryCounts::default();
        for study in studies.values() {
            match StatusModel::category(study.status) {
                ris_core::StatusCategory::Pending => counts.pending += 1,
                ris_core::StatusCategory::InProgress => counts.in_progress += 1,
                ris_core::StatusCategory::Completed => counts.completed += 1,
                ris_core::StatusCategory::Archived => counts.archived += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ris_core::Priority;

    #[tokio::test]
    async fn test_idempotent_ingestion() {
        let registry = StudyRegistry::new();
        let study_id = Uuid::new_v4();

        let metadata = StudyMetadata {
            accession_number: Some("ACC20231030001".to_string()),
            modality: Some("CT".to_string()),
            priority: Some(Priority::Urgent),
            ..Default::default()
        };

        let (first, created) = registry
            .create_or_touch(study_id, metadata.clone())
            .await
            .unwrap();
        assert!(created);
        assert_eq!(first.status, WorkflowStatus::NewStudyReceived);

        // 状态前移后重复摄取，不能回退也不能清空分配
        registry
            .with_study_mut(study_id, |study| {
                study.status = WorkflowStatus::AssignedToDoctor;
                study.assigned_doctor_id = Some(Uuid::new_v4());
                Ok(())
            })
            .await
            .unwrap();

        let (second, created) = registry.create_or_touch(study_id, metadata).await.unwrap();
        assert!(!created);
        assert_eq!(second.status, WorkflowStatus::AssignedToDoctor);
        assert!(second.assigned_doctor_id.is_some());
    }

    #[tokio::test]
    async fn test_get_unknown_study() {
        let registry = StudyRegistry::new();
        let result = registry.get(Uuid::new_v4()).await;
        assert!(matches!(result, Err(RisError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_category_counts() {
        let registry = StudyRegistry::new();

        for status in [
            WorkflowStatus::NewStudyReceived,
            WorkflowStatus::PendingAssignment,
            WorkflowStatus::ReportInProgress,
            WorkflowStatus::ReportFinalized,
            WorkflowStatus::Archived,
        ] {
            let study_id = Uuid::new_v4();
            registry
                .create_or_touch(study_id, StudyMetadata::default())
                .await
                .unwrap();
            registry
                .with_study_mut(study_id, |study| {
                    study.status = status;
                    Ok(())
                })
                .await
                .unwrap();
        }

        let counts = registry.category_counts().await;
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.in_progress, 1);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.archived, 1);
    }
}
