//! 离线队列重放器
//!
//! 连通恢复时按入队顺序（FIFO）串行重放待发条目：同会话内严格保序，
//! 避免消息顺序倒置。单条失败只跳过该条（留待下次触发），不中断
//! 队列其余部分，也不回滚已成功的条目。

use crate::im::message::api::MessageGateway;
use crate::im::message::dao::MessageStore;
use crate::im::state::ChatStateManager;
use std::sync::Arc;
use tracing::{info, warn};

/// 离线队列重放器（队列的唯一写删方，经由 store 的 outbox 操作）
pub struct OutboxReconciler {
    store: Arc<MessageStore>,
    gateway: Arc<dyn MessageGateway>,
    state: Arc<ChatStateManager>,
    /// 同一时刻最多一轮重放
    draining: tokio::sync::Mutex<()>,
}

impl OutboxReconciler {
    pub fn new(
        store: Arc<MessageStore>,
        gateway: Arc<dyn MessageGateway>,
        state: Arc<ChatStateManager>,
    ) -> Self {
        Self {
            store,
            gateway,
            state,
            draining: tokio::sync::Mutex::new(()),
        }
    }

    /// 重放一轮离线队列，返回成功补发的条数。
    ///
    /// 条目只在重放成功后删除；重复触发对已清空的队列是无操作。
    pub async fn drain(&self) -> usize {
        let _guard = self.draining.lock().await;

        let entries = self.store.get_pending_messages().await;
        if entries.is_empty() {
            return 0;
        }
        info!("[Outbox] 🔄 开始重放离线队列，共 {} 条", entries.len());

        let mut replayed = 0;
        for entry in entries {
            let draft = entry.to_outgoing();
            match self.gateway.send_message(&draft).await {
                Ok(confirmed) => {
                    self.store.remove_pending_message(&entry.temp_id).await;
                    self.state.confirm_send(&entry.temp_id, confirmed).await;
                    replayed += 1;
                }
                Err(e) => {
                    // 留在队列里等下次触发，继续处理后面的条目
                    warn!(
                        "[Outbox] ⚠️ 条目重放失败，保留待下次: tempID={}, {}",
                        entry.temp_id, e
                    );
                }
            }
        }
        info!("[Outbox] ✅ 重放结束，成功 {} 条", replayed);
        replayed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::conversation::api::ConversationGateway;
    use crate::im::conversation::models::Conversation;
    use crate::im::message::models::{Message, MessageStatus, MessageType, OutgoingMessage};
    use crate::im::types::ApiError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FlakyGateway {
        online: AtomicBool,
        counter: AtomicUsize,
        /// 指定内容的条目始终发送失败（模拟局部失败）
        poison_content: Option<String>,
    }

    impl FlakyGateway {
        fn new(online: bool) -> Self {
            Self {
                online: AtomicBool::new(online),
                counter: AtomicUsize::new(0),
                poison_content: None,
            }
        }

        fn set_online(&self, online: bool) {
            self.online.store(online, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl MessageGateway for FlakyGateway {
        async fn send_message(&self, draft: &OutgoingMessage) -> Result<Message, ApiError> {
            if !self.online.load(Ordering::SeqCst) {
                return Err(ApiError::Network("连接不可达".to_string()));
            }
            if self.poison_content.as_deref() == Some(draft.content.as_str()) {
                return Err(ApiError::Network("临时抖动".to_string()));
            }
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            let mut msg = Message::new_outgoing(
                format!("srv-{}", n),
                draft.conversation_id.clone(),
                "u1".to_string(),
                draft.msg_type,
                draft.content.clone(),
                draft.attachments.clone(),
                draft.reply_to.clone(),
            );
            msg.status = MessageStatus::Sent;
            Ok(msg)
        }

        async fn update_message(&self, _: &str, _: &str) -> Result<Message, ApiError> {
            Err(ApiError::Network("测试未覆盖".to_string()))
        }
        async fn delete_message(&self, _: &str) -> Result<(), ApiError> {
            Ok(())
        }
        async fn list_messages(
            &self,
            _: &str,
            _: Option<&str>,
            _: u32,
        ) -> Result<Vec<Message>, ApiError> {
            Ok(vec![])
        }
        async fn search_messages(&self, _: &str, _: &str) -> Result<Vec<Message>, ApiError> {
            Ok(vec![])
        }
        async fn add_reaction(&self, _: &str, _: &str) -> Result<Message, ApiError> {
            Err(ApiError::Network("测试未覆盖".to_string()))
        }
        async fn remove_reaction(&self, _: &str, _: &str) -> Result<Message, ApiError> {
            Err(ApiError::Network("测试未覆盖".to_string()))
        }
        async fn mark_read(&self, _: &str, _: &[String]) -> Result<(), ApiError> {
            Ok(())
        }
    }

    struct NoopConversationGateway;

    #[async_trait]
    impl ConversationGateway for NoopConversationGateway {
        async fn list_conversations(&self, _: u32, _: u32) -> Result<Vec<Conversation>, ApiError> {
            Ok(vec![])
        }
        async fn get_conversation(&self, _: &str) -> Result<Conversation, ApiError> {
            Err(ApiError::Network("测试未覆盖".to_string()))
        }
        async fn create_conversation(
            &self,
            _: &[String],
            _: Option<&str>,
        ) -> Result<Conversation, ApiError> {
            Err(ApiError::Network("测试未覆盖".to_string()))
        }
        async fn update_conversation(
            &self,
            _: &str,
            _: Option<&str>,
            _: Option<&str>,
        ) -> Result<Conversation, ApiError> {
            Err(ApiError::Network("测试未覆盖".to_string()))
        }
        async fn set_pinned(&self, _: &str, _: bool) -> Result<(), ApiError> {
            Ok(())
        }
        async fn set_muted_until(&self, _: &str, _: i64) -> Result<(), ApiError> {
            Ok(())
        }
    }

    async fn pipeline(
        online: bool,
    ) -> (
        Arc<MessageStore>,
        Arc<FlakyGateway>,
        Arc<ChatStateManager>,
        OutboxReconciler,
    ) {
        let store = Arc::new(MessageStore::new("sqlite::memory:").await.unwrap());
        let gateway = Arc::new(FlakyGateway::new(online));
        let state = Arc::new(ChatStateManager::new(
            "u1".to_string(),
            store.clone(),
            gateway.clone(),
            Arc::new(NoopConversationGateway),
        ));
        let reconciler = OutboxReconciler::new(store.clone(), gateway.clone(), state.clone());
        (store, gateway, state, reconciler)
    }

    /// 离线往返场景：离线发送 → pending + 一条离线条目；恢复连通并重放 →
    /// 队列清空、状态不再是 pending；紧接着再重放一次不产生重复。
    #[tokio::test]
    async fn offline_round_trip() {
        let (store, gateway, state, reconciler) = pipeline(false).await;
        state.set_active_conversation(Some("c1".to_string()));

        let pending = state
            .send_message("c1", MessageType::Text, "hello".to_string(), vec![], None)
            .await
            .unwrap();
        assert_eq!(pending.status, MessageStatus::Pending);
        assert_eq!(store.get_pending_messages().await.len(), 1);

        gateway.set_online(true);
        assert_eq!(reconciler.drain().await, 1);

        assert!(store.get_pending_messages().await.is_empty());
        let msgs = state.messages();
        assert_eq!(msgs.len(), 1);
        assert_ne!(msgs[0].status, MessageStatus::Pending);
        assert_eq!(msgs[0].message_id, "srv-1");

        // 成功后连续重放是无操作，不会重复发送
        assert_eq!(reconciler.drain().await, 0);
        assert_eq!(state.messages().len(), 1);
    }

    #[tokio::test]
    async fn replay_preserves_fifo_order() {
        let (store, gateway, state, reconciler) = pipeline(false).await;
        state.set_active_conversation(Some("c1".to_string()));

        for text in ["第一条", "第二条", "第三条"] {
            state
                .send_message("c1", MessageType::Text, text.to_string(), vec![], None)
                .await
                .unwrap();
        }
        assert_eq!(store.get_pending_messages().await.len(), 3);

        gateway.set_online(true);
        assert_eq!(reconciler.drain().await, 3);

        // 串行重放：确认顺序与入队顺序一致
        let contents: Vec<_> = state.messages().iter().map(|m| m.content.clone()).collect();
        assert_eq!(contents, vec!["第一条", "第二条", "第三条"]);
        let ids: Vec<_> = state
            .messages()
            .iter()
            .map(|m| m.message_id.clone())
            .collect();
        assert_eq!(ids, vec!["srv-1", "srv-2", "srv-3"]);
    }

    #[tokio::test]
    async fn failed_entry_stays_without_blocking_rest() {
        let store = Arc::new(MessageStore::new("sqlite::memory:").await.unwrap());
        let offline = Arc::new(FlakyGateway::new(false));
        let state = Arc::new(ChatStateManager::new(
            "u1".to_string(),
            store.clone(),
            offline,
            Arc::new(NoopConversationGateway),
        ));
        state.set_active_conversation(Some("c1".to_string()));

        state
            .send_message("c1", MessageType::Text, "有毒".to_string(), vec![], None)
            .await
            .unwrap();
        state
            .send_message("c1", MessageType::Text, "正常".to_string(), vec![], None)
            .await
            .unwrap();
        assert_eq!(store.get_pending_messages().await.len(), 2);

        // 恢复连通，但第一条始终失败：局部失败不阻塞后续条目
        let flaky = Arc::new(FlakyGateway {
            online: AtomicBool::new(true),
            counter: AtomicUsize::new(0),
            poison_content: Some("有毒".to_string()),
        });
        let reconciler = OutboxReconciler::new(store.clone(), flaky, state.clone());
        assert_eq!(reconciler.drain().await, 1);

        // 失败条目留在队列等下次触发，成功条目已移除
        let remaining = store.get_pending_messages().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].content, "有毒");
    }
}
