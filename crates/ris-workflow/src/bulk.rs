//! 批量操作协调器
//!
//! 将一个操作独立地应用到一组检查上，逐项收集成败，绝不整单回滚。
//! 扇出受有界并发约束；项与项之间支持协作式取消，已在飞的单项
//! 允许跑完，避免把检查留在未定义的中间状态。

use ris_core::{Actor, BulkOperationResult, ErrorKind, Priority, Result, RisError};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::BulkConfig;

/// 批量操作种类
#[derive(Debug, Clone)]
pub enum BulkOperation {
    /// 批量分配给同一医生
    Assign {
        doctor_id: Uuid,
        note: Option<String>,
        priority_override: Option<Priority>,
    },
    /// 批量标记未授权（强制归档，不可逆）
    MarkUnauthorized { reason: String },
    /// 批量派发报告通知
    DispatchReport,
    /// 批量导出行
    ExportRow,
    /// 批量加入zip打包
    IncludeInZip,
}

impl BulkOperation {
    /// 操作标签（日志用）
    pub fn tag(&self) -> &'static str {
        match self {
            BulkOperation::Assign { .. } => "assign",
            BulkOperation::MarkUnauthorized { .. } => "mark_unauthorized",
            BulkOperation::DispatchReport => "dispatch_report",
            BulkOperation::ExportRow => "export_row",
            BulkOperation::IncludeInZip => "include_in_zip",
        }
    }

    /// 导出类操作不改状态，不占每检查互斥门，受软上限确认约束
    pub fn is_export(&self) -> bool {
        matches!(
            self,
            BulkOperation::ExportRow | BulkOperation::IncludeInZip
        )
    }
}

/// 批量操作请求
#[derive(Debug, Clone)]
pub struct BulkRequest {
    pub operation: BulkOperation,
    pub study_ids: Vec<Uuid>,
    pub actor: Actor,
    /// 导出/打包批次超过确认阈值时必须显式置真
    pub confirm_large: bool,
}

/// 协作式取消标志
///
/// 协调器在启动每个单项前检查一次；不中断已在飞的单项。
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 批量操作协调器
#[derive(Debug)]
pub struct BulkCoordinator {
    config: BulkConfig,
}

impl BulkCoordinator {
    pub fn new(config: BulkConfig) -> Self {
        Self { config }
    }

    /// 请求形状校验
    ///
    /// 只有请求本身的 `Validation` 会中止整个调用；
    /// 单项错误一律降级为结果列表项。
    /// 返回去重且保序的检查ID列表。
    pub fn validate(&self, request: &BulkRequest) -> Result<Vec<Uuid>> {
        if request.study_ids.is_empty() {
            return Err(RisError::Validation(
                "Bulk request requires a non-empty study list".to_string(),
            ));
        }

        if let BulkOperation::MarkUnauthorized { reason } = &request.operation {
            if reason.trim().is_empty() {
                return Err(RisError::Validation(
                    "Bulk mark_unauthorized requires a non-empty reason".to_string(),
                ));
            }
        }

        let mut seen = std::collections::HashSet::new();
        let ids: Vec<Uuid> = request
            .study_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        if request.operation.is_export()
            && ids.len() > self.config.confirmation_threshold
            && !request.confirm_large
        {
            return Err(RisError::Validation(format!(
                "Bulk {} over {} items requires explicit confirmation",
                request.operation.tag(),
                self.config.confirmation_threshold
            )));
        }

        Ok(ids)
    }

    /// 执行批量操作
    ///
    /// `per_item` 为单项执行逻辑；仅 `ExternalCollaboratorTimeout`
    /// 每项至多重试一次（可配置），其它错误不自动重试。
    pub async fn run<F, Fut>(
        &self,
        request: BulkRequest,
        cancel: CancellationFlag,
        per_item: F,
    ) -> Result<Vec<BulkOperationResult>>
    where
        F: Fn(Uuid) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let ids = self.validate(&request)?;
        let tag = request.operation.tag();
        tracing::info!(
            "Starting bulk {} over {} studies (actor {})",
            tag,
            ids.len(),
            request.actor.id
        );

        let per_item = Arc::new(per_item);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let timeout_retries = self.config.timeout_retries;

        let mut join_set = JoinSet::new();
        for (index, study_id) in ids.iter().copied().enumerate() {
            let per_item = per_item.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();

            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            index,
                            study_id,
                            Err(RisError::Internal("Bulk semaphore closed".to_string())),
                        )
                    }
                };

                // 启动单项前的协作式取消检查
                if cancel.is_cancelled() {
                    return (
                        index,
                        study_id,
                        Err(RisError::Cancelled(format!(
                            "Bulk item for study {} skipped",
                            study_id
                        ))),
                    );
                }

                let mut attempt = 0u32;
                let outcome = loop {
                    match per_item(study_id).await {
                        Err(RisError::CollaboratorTimeout(detail))
                            if attempt < timeout_retries =>
                        {
                            attempt += 1;
                            tracing::warn!(
                                "Bulk item for study {} timed out ({}), retry {}/{}",
                                study_id,
                                detail,
                                attempt,
                                timeout_retries
                            );
                        }
                        other => break other,
                    }
                };

                (index, study_id, outcome)
            });
        }

        let mut slots: Vec<Option<BulkOperationResult>> = vec![None; ids.len()];
        while let Some(joined) = join_set.join_next().await {
            let (index, study_id, outcome) = joined
                .map_err(|e| RisError::Internal(format!("Bulk worker panicked: {}", e)))?;

            let result = match outcome {
                Ok(()) => BulkOperationResult {
                    study_id,
                    success: true,
                    error: None,
                },
                Err(err) => {
                    tracing::debug!("Bulk {} failed for study {}: {}", tag, study_id, err);
                    BulkOperationResult {
                        study_id,
                        success: false,
                        error: Some(ErrorKind::from(&err)),
                    }
                }
            };
            slots[index] = Some(result);
        }

        let mut results = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Some(result) => results.push(result),
                None => {
                    return Err(RisError::Internal(
                        "Bulk result slot left unfilled".to_string(),
                    ))
                }
            }
        }

        let failed = results.iter().filter(|r| !r.success).count();
        tracing::info!(
            "Bulk {} finished: {} succeeded, {} failed",
            tag,
            results.len() - failed,
            failed
        );
        Ok(results)
    }
}
