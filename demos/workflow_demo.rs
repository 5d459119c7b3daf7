//! 工作流引擎演示程序
//!
//! 展示检查工作流引擎的核心功能，包括摄取、分配、报告生命周期、
//! 批量操作、TAT核算和按作用域的事件订阅

use ris_core::utils::generate_accession_number;
use ris_core::{Actor, Doctor, Priority, Role, StudyMetadata};
use ris_workflow::{
    format_minutes, BulkOperation, BulkRequest, CancellationFlag, InMemoryReportStore,
    RecordingDispatchGateway, RecordingExportSink, SubscriberScope, WorkflowConfig,
    WorkflowService,
};
use std::sync::Arc;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    println!("🚀 RIS 检查工作流引擎演示\n");

    // 1. 构建服务与内存协作方
    let report_store = Arc::new(InMemoryReportStore::new());
    let dispatch = Arc::new(RecordingDispatchGateway::new());
    let export = Arc::new(RecordingExportSink::new());
    let service = WorkflowService::new(
        WorkflowConfig::default(),
        report_store.clone(),
        dispatch.clone(),
        export.clone(),
    );
    println!("✅ 工作流服务已就绪");

    // 2. 登记医生名册
    let admin = Actor::new(Uuid::new_v4(), Role::Admin);
    let doctor_id = Uuid::new_v4();
    service
        .register_doctor(
            Doctor {
                id: doctor_id,
                name: "张医生".to_string(),
                specialization: Some("Neuroradiology".to_string()),
                is_active: true,
                is_logged_in: true,
            },
            admin,
        )
        .await?;
    let doctor = Actor::new(doctor_id, Role::Doctor);
    println!("✅ 医生名册设置完成");

    // 3. 订阅事件（管理员作用域）
    let (admin_session, mut admin_rx) = service.subscribe(SubscriberScope::Admin).await;

    // 4. 摄取示例检查
    let mut study_ids = Vec::new();
    for (modality, priority) in [
        ("CT", Priority::Emergency),
        ("MR", Priority::Urgent),
        ("XR", Priority::Routine),
    ] {
        let study_id = Uuid::new_v4();
        service
            .create_or_touch_study(
                study_id,
                StudyMetadata {
                    accession_number: Some(generate_accession_number()),
                    modality: Some(modality.to_string()),
                    origin_location: Some("east".to_string()),
                    priority: Some(priority),
                    acquired_at: Some(chrono::Utc::now() - chrono::Duration::minutes(40)),
                    ..Default::default()
                },
                Actor::system(),
            )
            .await?;
        study_ids.push(study_id);
        println!("📋 摄取检查 {} ({}, 优先级 {:?})", study_id, modality, priority);
    }
    println!(
        "🔔 管理员未读新检查: {}",
        service.unseen_count(admin_session).await.unwrap_or(0)
    );

    // 5. 报告生命周期：分配 → 撰写 → 定稿
    let s1 = study_ids[0];
    service
        .assign(s1, doctor_id, admin, Some("急诊优先".to_string()), None)
        .await?;
    service.start_report(s1, doctor).await?;
    service.finalize(s1, doctor).await?;
    println!("✅ 检查 {} 报告已定稿", s1);

    // 6. TAT核算
    let tat = service.tat(s1).await?;
    if let Some(minutes) = tat.study_to_report_minutes {
        println!("⏱️  S→R TAT: {}", format_minutes(minutes));
    }
    if let Some(minutes) = tat.upload_to_report_minutes {
        println!("⏱️  U→R TAT: {}", format_minutes(minutes));
    }
    if let Some(minutes) = tat.assign_to_report_minutes {
        println!("⏱️  A→R TAT: {}", format_minutes(minutes));
    }

    // 7. 批量派发：只有已定稿的检查报告可用
    report_store.set_available(s1).await;
    let results = service
        .bulk(
            BulkRequest {
                operation: BulkOperation::DispatchReport,
                study_ids: study_ids.clone(),
                actor: admin,
                confirm_large: false,
            },
            CancellationFlag::new(),
        )
        .await?;
    let succeeded = results.iter().filter(|r| r.success).count();
    println!(
        "📤 批量派发完成: {} 成功, {} 失败",
        succeeded,
        results.len() - succeeded
    );

    // 8. 批量导出（只读，不改状态）
    let results = service
        .bulk(
            BulkRequest {
                operation: BulkOperation::ExportRow,
                study_ids: study_ids.clone(),
                actor: admin,
                confirm_large: false,
            },
            CancellationFlag::new(),
        )
        .await?;
    println!(
        "📦 批量导出完成: {} 条记录",
        results.iter().filter(|r| r.success).count()
    );

    // 9. 工作台类别计数
    let counts = service.category_counts().await;
    println!("\n📊 工作台概览:");
    println!("   待处理: {}", counts.pending);
    println!("   进行中: {}", counts.in_progress);
    println!("   已完成: {}", counts.completed);
    println!("   已归档: {}", counts.archived);

    // 10. 确认查看并消费事件
    service.acknowledge_view(admin_session).await;
    let mut event_count = 0;
    while admin_rx.try_recv().is_ok() {
        event_count += 1;
    }
    println!("\n📨 管理员作用域共收到 {} 个事件", event_count);

    println!("\n🎉 工作流引擎演示完成!");
    Ok(())
}
