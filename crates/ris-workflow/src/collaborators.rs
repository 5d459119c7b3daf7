//! 外部协作方接口
//!
//! 报告/文档存储、报告派发和导出渲染都是引擎之外的系统，
//! 这里只定义引擎编排所需的契约。引擎只决定哪些检查符合条件，
//! 从不接触文档内容本身。内存实现用于演示和测试。

use async_trait::async_trait;
use ris_core::{Result, Study};
use std::collections::HashSet;
use tokio::sync::Mutex;
use uuid::Uuid;

/// 报告/文档存储协作方
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// 查询检查的报告是否已可用
    async fn report_available(&self, study_id: Uuid) -> Result<bool>;
}

/// 报告派发协作方（推送通知下游）
#[async_trait]
pub trait DispatchGateway: Send + Sync {
    /// 派发一条检查的报告通知
    async fn dispatch_report(&self, study_id: Uuid) -> Result<()>;
}

/// 导出渲染/打包协作方
#[async_trait]
pub trait ExportSink: Send + Sync {
    /// 导出单条检查行
    async fn export_row(&self, study: &Study) -> Result<()>;

    /// 把检查加入zip打包清单
    async fn add_to_zip(&self, study: &Study) -> Result<()>;
}

/// 内存报告存储
#[derive(Debug, Default)]
pub struct InMemoryReportStore {
    available: Mutex<HashSet<Uuid>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 标记检查的报告已可用
    pub async fn set_available(&self, study_id: Uuid) {
        self.available.lock().await.insert(study_id);
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn report_available(&self, study_id: Uuid) -> Result<bool> {
        Ok(self.available.lock().await.contains(&study_id))
    }
}

/// 记录型派发网关（记下每次派发调用，供断言无副作用）
#[derive(Debug, Default)]
pub struct RecordingDispatchGateway {
    dispatched: Mutex<Vec<Uuid>>,
}

impl RecordingDispatchGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn dispatched(&self) -> Vec<Uuid> {
        self.dispatched.lock().await.clone()
    }
}

#[async_trait]
impl DispatchGateway for RecordingDispatchGateway {
    async fn dispatch_report(&self, study_id: Uuid) -> Result<()> {
        tracing::info!("Dispatching report notification for study {}", study_id);
        self.dispatched.lock().await.push(study_id);
        Ok(())
    }
}

/// 记录型导出接收端
#[derive(Debug, Default)]
pub struct RecordingExportSink {
    rows: Mutex<Vec<Uuid>>,
    zip_entries: Mutex<Vec<Uuid>>,
}

impl RecordingExportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn exported_rows(&self) -> Vec<Uuid> {
        self.rows.lock().await.clone()
    }

    pub async fn zip_entries(&self) -> Vec<Uuid> {
        self.zip_entries.lock().await.clone()
    }
}

#[async_trait]
impl ExportSink for RecordingExportSink {
    async fn export_row(&self, study: &Study) -> Result<()> {
        tracing::debug!("Exporting row for study {}", study.id);
        self.rows.lock().await.push(study.id);
        Ok(())
    }

    async fn add_to_zip(&self, study: &Study) -> Result<()> {
        tracing::debug!("Adding study {} to zip manifest", study.id);
        self.zip_entries.lock().await.push(study.id);
        Ok(())
    }
}
