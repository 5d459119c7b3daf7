//! 事件通知器
//!
//! 按角色作用域向订阅者推送状态/分配变更事件，并维护每会话的
//! “未读新检查”计数。投递为尽力而为、至多一次：订阅者断开或
//! 通道已满时事件直接丢弃，重连后由订阅方重新拉取当前状态对账。

use chrono::{DateTime, Utc};
use ris_core::{Actor, WorkflowStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// 订阅作用域
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubscriberScope {
    /// 管理员：接收全部事件
    Admin,
    /// 医生：只接收分配给自己的检查的事件
    Doctor(Uuid),
    /// 检验科：只接收本机构来源检查的事件
    LabStaff(String),
}

/// 事件种类
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventKind {
    StudyReceived,
    StatusChanged,
    AssignmentChanged,
}

/// 工作流事件信封
///
/// 在 `StatusEvent` 字段之外携带作用域路由所需的上下文。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub kind: EventKind,
    pub study_id: Uuid,
    pub previous_status: WorkflowStatus,
    pub new_status: WorkflowStatus,
    pub at: DateTime<Utc>,
    pub actor: Actor,
    pub assigned_doctor_id: Option<Uuid>,
    pub origin_location: Option<String>,
}

#[derive(Debug)]
struct Subscription {
    scope: SubscriberScope,
    tx: mpsc::Sender<WorkflowEvent>,
    unseen_new_studies: u64,
}

/// 事件通知器
#[derive(Debug)]
pub struct EventNotifier {
    subscriptions: RwLock<HashMap<Uuid, Subscription>>,
    channel_capacity: usize,
}

impl EventNotifier {
    /// 创建通知器，`channel_capacity` 为每订阅者通道容量
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            channel_capacity,
        }
    }

    /// 注册订阅者，返回会话ID和事件接收端
    pub async fn subscribe(&self, scope: SubscriberScope) -> (Uuid, mpsc::Receiver<WorkflowEvent>) {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let session_id = Uuid::new_v4();

        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.insert(
            session_id,
            Subscription {
                scope: scope.clone(),
                tx,
                unseen_new_studies: 0,
            },
        );

        tracing::info!("Subscriber {} registered with scope {:?}", session_id, scope);
        (session_id, rx)
    }

    /// 注销订阅者
    pub async fn unsubscribe(&self, session_id: Uuid) {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.remove(&session_id).is_some() {
            tracing::info!("Subscriber {} unregistered", session_id);
        }
    }

    /// 发布事件到所有作用域匹配的订阅者
    ///
    /// 投递失败（断开/通道满）的订阅者直接跳过，无持久队列。
    pub async fn publish(&self, event: &WorkflowEvent) {
        let mut subscriptions = self.subscriptions.write().await;
        for (session_id, subscription) in subscriptions.iter_mut() {
            if !scope_matches(&subscription.scope, event) {
                continue;
            }

            if event.kind == EventKind::StudyReceived {
                subscription.unseen_new_studies += 1;
            }

            if let Err(e) = subscription.tx.try_send(event.clone()) {
                tracing::debug!(
                    "Dropping event for subscriber {} (disconnected or full): {}",
                    session_id,
                    e
                );
            }
        }
    }

    /// 查询会话的未读新检查计数
    pub async fn unseen_count(&self, session_id: Uuid) -> Option<u64> {
        let subscriptions = self.subscriptions.read().await;
        subscriptions
            .get(&session_id)
            .map(|s| s.unseen_new_studies)
    }

    /// 订阅者确认查看，计数清零
    pub async fn acknowledge_view(&self, session_id: Uuid) {
        let mut subscriptions = self.subscriptions.write().await;
        if let Some(subscription) = subscriptions.get_mut(&session_id) {
            subscription.unseen_new_studies = 0;
        }
    }

    /// 当前订阅者数量
    pub async fn subscriber_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }
}

fn scope_matches(scope: &SubscriberScope, event: &WorkflowEvent) -> bool {
    match scope {
        SubscriberScope::Admin => true,
        SubscriberScope::Doctor(doctor_id) => event.assigned_doctor_id == Some(*doctor_id),
        SubscriberScope::LabStaff(location) => {
            event.origin_location.as_deref() == Some(location.as_str())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ris_core::Role;

    fn event(
        kind: EventKind,
        assigned_doctor_id: Option<Uuid>,
        origin_location: Option<&str>,
    ) -> WorkflowEvent {
        WorkflowEvent {
            kind,
            study_id: Uuid::new_v4(),
            previous_status: WorkflowStatus::PendingAssignment,
            new_status: WorkflowStatus::AssignedToDoctor,
            at: Utc::now(),
            actor: Actor::new(Uuid::new_v4(), Role::Admin),
            assigned_doctor_id,
            origin_location: origin_location.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_scoped_delivery() {
        let notifier = EventNotifier::new(8);
        let doctor_id = Uuid::new_v4();

        let (_admin, mut admin_rx) = notifier.subscribe(SubscriberScope::Admin).await;
        let (_doc, mut doc_rx) = notifier.subscribe(SubscriberScope::Doctor(doctor_id)).await;
        let (_other, mut other_rx) = notifier
            .subscribe(SubscriberScope::Doctor(Uuid::new_v4()))
            .await;
        let (_lab, mut lab_rx) = notifier
            .subscribe(SubscriberScope::LabStaff("lab-east".to_string()))
            .await;

        let event = event(
            EventKind::AssignmentChanged,
            Some(doctor_id),
            Some("lab-east"),
        );
        notifier.publish(&event).await;

        assert!(admin_rx.try_recv().is_ok());
        assert!(doc_rx.try_recv().is_ok());
        assert!(other_rx.try_recv().is_err());
        assert!(lab_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_unseen_counter_reset_on_ack() {
        let notifier = EventNotifier::new(8);
        let (session_id, _rx) = notifier.subscribe(SubscriberScope::Admin).await;

        notifier
            .publish(&event(EventKind::StudyReceived, None, None))
            .await;
        notifier
            .publish(&event(EventKind::StudyReceived, None, None))
            .await;
        // 状态变更不计入新检查计数
        notifier
            .publish(&event(EventKind::StatusChanged, None, None))
            .await;

        assert_eq!(notifier.unseen_count(session_id).await, Some(2));

        notifier.acknowledge_view(session_id).await;
        assert_eq!(notifier.unseen_count(session_id).await, Some(0));
    }

    #[tokio::test]
    async fn test_best_effort_drop_on_full_channel() {
        let notifier = EventNotifier::new(1);
        let (_session_id, mut rx) = notifier.subscribe(SubscriberScope::Admin).await;

        notifier
            .publish(&event(EventKind::StatusChanged, None, None))
            .await;
        // 容量已满，第二个事件被丢弃而非阻塞
        notifier
            .publish(&event(EventKind::StatusChanged, None, None))
            .await;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnected_subscriber_dropped_silently() {
        let notifier = EventNotifier::new(8);
        let (_session_id, rx) = notifier.subscribe(SubscriberScope::Admin).await;
        drop(rx);

        // 不应panic，不应阻塞
        notifier
            .publish(&event(EventKind::StatusChanged, None, None))
            .await;
    }
}
