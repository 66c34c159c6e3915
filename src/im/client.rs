//! 聊天客户端核心实现模块
//!
//! 组合根：显式构造并持有本地缓存、HTTP 网关、状态管理器、离线重放器、
//! 连通性监视器与事件通道（依赖注入，无进程级全局单例），把四类入站
//! 事件接到状态管理器与本地缓存上，并向 UI 层暴露命令式方法与监听器
//! 注册点。

use crate::im::connectivity::ConnectivityMonitor;
use crate::im::conversation::api::{ConversationApi, ConversationGateway};
use crate::im::conversation::listener::{ConversationListener, EmptyConversationListener};
use crate::im::conversation::models::Conversation;
use crate::im::message::api::{MessageApi, MessageGateway, UploadResult};
use crate::im::message::dao::MessageStore;
use crate::im::message::listener::{EmptyMessageListener, MessageListener};
use crate::im::message::models::{Attachment, Message, MessageType};
use crate::im::outbox::OutboxReconciler;
use crate::im::state::ChatStateManager;
use crate::im::transport::{ChannelConfig, EventChannel};
use crate::im::types::{event_name, ApiError, ClientCommand, ServerEvent};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 客户端配置
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// 用户 ID
    pub user_id: String,
    /// 鉴权 token（外部鉴权方签发，本层只透传）
    pub token: String,
    /// WebSocket 服务器 URL
    pub ws_url: String,
    /// HTTP API 基础地址
    pub api_base_url: String,
    /// 本地缓存使用的 SQLite 数据库 URL
    ///
    /// 例如：`sqlite://linkchat.db?mode=rwc`
    pub db_url: String,
    /// 压缩方式，例如 "gzip" 或空字符串表示不压缩
    pub compression: String,
}

impl ClientConfig {
    /// 创建默认配置
    pub fn new(user_id: String, token: String) -> Self {
        Self {
            user_id,
            token,
            ws_url: "ws://localhost:9601".to_string(),
            api_base_url: "http://localhost:9602".to_string(),
            db_url: "sqlite://linkchat.db?mode=rwc".to_string(),
            compression: "gzip".to_string(),
        }
    }
}

/// 聊天客户端
#[derive(Clone)]
pub struct ChatClient {
    config: ClientConfig,
    channel: EventChannel,
    store: Arc<MessageStore>,
    media_api: Arc<MessageApi>,
    state: Arc<ChatStateManager>,
    monitor: Arc<ConnectivityMonitor>,
    message_listener: Arc<dyn MessageListener>,
    conversation_listener: Arc<dyn ConversationListener>,
}

impl ChatClient {
    /// 创建新的客户端（打开本地缓存并组装全部组件，不建立网络连接）
    pub async fn new(config: ClientConfig) -> Result<Self> {
        // 带认证拦截器的 HTTP 客户端（token 通过 default_headers 自动添加）
        let http_client = reqwest::ClientBuilder::new()
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::HeaderName::from_static("token"),
                    reqwest::header::HeaderValue::from_str(&config.token)
                        .context("无效的 token")?,
                );
                headers
            })
            .build()
            .context("创建 HTTP 客户端失败")?;

        let store = Arc::new(MessageStore::new(&config.db_url).await?);
        let media_api = Arc::new(MessageApi::new(
            http_client.clone(),
            config.api_base_url.clone(),
        ));
        let messages_api: Arc<dyn MessageGateway> = Arc::new(MessageApi::new(
            http_client.clone(),
            config.api_base_url.clone(),
        ));
        let conversations_api: Arc<dyn ConversationGateway> = Arc::new(ConversationApi::new(
            http_client,
            config.api_base_url.clone(),
            config.user_id.clone(),
        ));
        let state = Arc::new(ChatStateManager::new(
            config.user_id.clone(),
            store.clone(),
            messages_api.clone(),
            conversations_api,
        ));
        let reconciler = Arc::new(OutboxReconciler::new(
            store.clone(),
            messages_api,
            state.clone(),
        ));
        let monitor = Arc::new(ConnectivityMonitor::new(reconciler));
        let channel = EventChannel::new(ChannelConfig {
            ws_url: config.ws_url.clone(),
            token: config.token.clone(),
            user_id: config.user_id.clone(),
            compression: config.compression.clone(),
        });

        Ok(Self {
            config,
            channel,
            store,
            media_api,
            state,
            monitor,
            message_listener: Arc::new(EmptyMessageListener),
            conversation_listener: Arc::new(EmptyConversationListener),
        })
    }

    /// 注册消息监听器
    pub fn set_message_listener(&mut self, listener: Arc<dyn MessageListener>) {
        self.message_listener = listener;
    }

    /// 注册会话监听器
    pub fn set_conversation_listener(&mut self, listener: Arc<dyn ConversationListener>) {
        self.conversation_listener = listener;
    }

    /// 状态管理器句柄（UI 层读取快照用）
    pub fn state(&self) -> Arc<ChatStateManager> {
        self.state.clone()
    }

    /// 连通性监视器句柄（平台可达性信号喂入口）
    pub fn connectivity(&self) -> Arc<ConnectivityMonitor> {
        self.monitor.clone()
    }

    /// 连接到服务器并接好事件订阅；成功后后台拉取会话列表。
    /// 已连接时重复调用是无操作。
    pub async fn connect(&self) -> Result<()> {
        self.wire_event_handlers();
        self.channel.connect().await?;

        // 建连成功视为可达性恢复：触发一轮离线重放
        let monitor = self.monitor.clone();
        tokio::spawn(async move {
            monitor.update_reachability(Some(true)).await;
        });

        // 初始会话列表同步
        let state = self.state.clone();
        let conv_listener = self.conversation_listener.clone();
        tokio::spawn(async move {
            info!("[Client] 🔄 启动会话列表同步");
            match state.refresh_conversations(0).await {
                Ok(()) => {
                    let list =
                        serde_json::to_string(&state.conversations()).unwrap_or_default();
                    conv_listener.on_conversation_list_changed(list).await;
                    conv_listener
                        .on_total_unread_count_changed(state.total_unread())
                        .await;
                    info!("[Client] ✅ 会话列表同步完成");
                }
                Err(e) => warn!("[Client] ❌ 会话列表同步失败: {}", e),
            }
        });
        Ok(())
    }

    /// 断开连接（未连接时为无操作）
    pub async fn disconnect(&self) {
        self.channel.disconnect().await;
        self.monitor.update_reachability(Some(false)).await;
    }

    fn wire_event_handlers(&self) {
        // 连接状态 → 监听器回调 + 连通性监视器（恢复即触发离线重放）
        {
            let monitor = self.monitor.clone();
            let listener = self.message_listener.clone();
            self.channel.set_status_handler(Arc::new(move |connected, message| {
                let monitor = monitor.clone();
                let listener = listener.clone();
                tokio::spawn(async move {
                    listener
                        .on_connection_status_changed(connected, message)
                        .await;
                    monitor.update_reachability(Some(connected)).await;
                });
            }));
        }

        // message:new：缓存写入 + 状态合并，会话列表随之刷新
        {
            let state = self.state.clone();
            let listener = self.message_listener.clone();
            let conv_listener = self.conversation_listener.clone();
            self.channel.subscribe(
                event_name::MESSAGE_NEW,
                Arc::new(move |event| {
                    let state = state.clone();
                    let listener = listener.clone();
                    let conv_listener = conv_listener.clone();
                    Box::pin(async move {
                        if let ServerEvent::MessageNew(msg) = event {
                            let json = serde_json::to_string(&msg).unwrap_or_default();
                            state.add_message(msg).await;
                            listener.on_message_new(json).await;
                            let list = serde_json::to_string(&state.conversations())
                                .unwrap_or_default();
                            conv_listener.on_conversation_list_changed(list).await;
                            conv_listener
                                .on_total_unread_count_changed(state.total_unread())
                                .await;
                        }
                    })
                }),
            );
        }

        // message:update：按 ID 整体替换；软删除走删除回调
        {
            let state = self.state.clone();
            let listener = self.message_listener.clone();
            self.channel.subscribe(
                event_name::MESSAGE_UPDATE,
                Arc::new(move |event| {
                    let state = state.clone();
                    let listener = listener.clone();
                    Box::pin(async move {
                        if let ServerEvent::MessageUpdate(msg) = event {
                            let json = serde_json::to_string(&msg).unwrap_or_default();
                            let deleted = msg.deleted_at.is_some();
                            let message_id = msg.message_id.clone();
                            state.update_message(msg).await;
                            if deleted {
                                listener.on_message_deleted(message_id).await;
                            } else {
                                listener.on_message_updated(json).await;
                            }
                        }
                    })
                }),
            );
        }

        // typing:update：输入状态集合合并
        {
            let state = self.state.clone();
            let listener = self.message_listener.clone();
            self.channel.subscribe(
                event_name::TYPING_UPDATE,
                Arc::new(move |event| {
                    let state = state.clone();
                    let listener = listener.clone();
                    Box::pin(async move {
                        if let ServerEvent::TypingUpdate(update) = event {
                            let json = serde_json::to_string(&update).unwrap_or_default();
                            state.apply_typing(&update);
                            listener.on_typing_changed(json).await;
                        }
                    })
                }),
            );
        }

        // message:read：批量已读
        {
            let state = self.state.clone();
            let listener = self.message_listener.clone();
            self.channel.subscribe(
                event_name::MESSAGE_READ,
                Arc::new(move |event| {
                    let state = state.clone();
                    let listener = listener.clone();
                    Box::pin(async move {
                        if let ServerEvent::MessageRead(receipt) = event {
                            let json = serde_json::to_string(&receipt).unwrap_or_default();
                            state.apply_read_receipt(&receipt).await;
                            listener.on_messages_read(json).await;
                        }
                    })
                }),
            );
        }
    }

    // ========== 会话命令 ==========

    /// 进入会话：设为当前会话、加载消息窗口、发 join 控制帧。
    /// 控制帧发送失败只记日志（离线时本地缓存照常可看）。
    pub async fn join_conversation(&self, conversation_id: &str) -> Result<()> {
        self.state
            .set_active_conversation(Some(conversation_id.to_string()));
        self.state.load_messages(conversation_id, None).await?;
        if let Err(e) = self
            .channel
            .send(&ClientCommand::JoinConversation {
                conversation_id: conversation_id.to_string(),
            })
            .await
        {
            debug!("[Client] join 控制帧未发出（离线？）: {}", e);
        }
        Ok(())
    }

    /// 离开会话：窗口停止消费更新；在途发送与离线重放不受影响
    pub async fn leave_conversation(&self, conversation_id: &str) {
        self.state.set_active_conversation(None);
        if let Err(e) = self
            .channel
            .send(&ClientCommand::LeaveConversation {
                conversation_id: conversation_id.to_string(),
            })
            .await
        {
            debug!("[Client] leave 控制帧未发出: {}", e);
        }
    }

    /// 输入状态信号（调用方自行防抖）
    pub async fn send_typing(&self, conversation_id: &str, is_typing: bool) {
        if let Err(e) = self
            .channel
            .send(&ClientCommand::Typing {
                conversation_id: conversation_id.to_string(),
                is_typing,
            })
            .await
        {
            debug!("[Client] typing 控制帧未发出: {}", e);
        }
    }

    /// 发送文本消息
    pub async fn send_text_message(
        &self,
        conversation_id: &str,
        text: String,
    ) -> Result<Message, ApiError> {
        debug!("[Client] 🔧 构造文本消息");
        self.state
            .send_message(conversation_id, MessageType::Text, text, vec![], None)
            .await
    }

    /// 发送带附件的消息（图片 / 视频 / 文件 / 语音）
    pub async fn send_attachment_message(
        &self,
        conversation_id: &str,
        msg_type: MessageType,
        attachments: Vec<Attachment>,
        caption: String,
    ) -> Result<Message, ApiError> {
        debug!("[Client] 🔧 构造附件消息: {:?}", msg_type);
        self.state
            .send_message(conversation_id, msg_type, caption, attachments, None)
            .await
    }

    /// 引用回复
    pub async fn send_reply_message(
        &self,
        conversation_id: &str,
        text: String,
        reply_to: String,
    ) -> Result<Message, ApiError> {
        self.state
            .send_message(
                conversation_id,
                MessageType::Text,
                text,
                vec![],
                Some(reply_to),
            )
            .await
    }

    /// 重试一条滞留 / 失败的消息
    pub async fn retry_message(&self, message_id: &str) -> Result<Message, ApiError> {
        self.state.retry_message(message_id).await
    }

    /// 编辑消息正文
    pub async fn edit_message(&self, message_id: &str, content: &str) -> Result<(), ApiError> {
        self.state.edit_message(message_id, content).await
    }

    /// 删除消息（同时清理本地缓存行）
    pub async fn delete_message(&self, message_id: &str) -> Result<(), ApiError> {
        self.state.delete_message(message_id).await
    }

    /// 回应切换：同一 (用户, emoji) 再次添加即取消
    pub async fn toggle_reaction(&self, message_id: &str, emoji: &str) -> Result<(), ApiError> {
        self.state.toggle_reaction(message_id, emoji).await
    }

    /// 标记会话已读：HTTP 上报 + read_messages 控制帧 + 本地清零
    pub async fn mark_conversation_read(&self, conversation_id: &str) -> Result<(), ApiError> {
        let ids = self.state.mark_conversation_read(conversation_id).await?;
        if !ids.is_empty() {
            if let Err(e) = self
                .channel
                .send(&ClientCommand::ReadMessages {
                    conversation_id: conversation_id.to_string(),
                    message_ids: ids,
                })
                .await
            {
                debug!("[Client] read_messages 控制帧未发出: {}", e);
            }
        }
        Ok(())
    }

    /// 向前加载更旧的历史消息（before 游标分页）
    pub async fn load_older_messages(
        &self,
        conversation_id: &str,
        before: &str,
    ) -> Result<(), ApiError> {
        self.state
            .load_messages(conversation_id, Some(before.to_string()))
            .await
    }

    /// 刷新会话列表：offset=0 下拉刷新，非零 offset 无限滚动追加
    pub async fn refresh_conversations(&self, offset: u32) -> Result<(), ApiError> {
        self.state.refresh_conversations(offset).await
    }

    /// 创建会话
    pub async fn create_conversation(
        &self,
        member_ids: &[String],
        title: Option<&str>,
    ) -> Result<Conversation, ApiError> {
        self.state.create_conversation(member_ids, title).await
    }

    /// 会话置顶 / 取消置顶
    pub async fn set_conversation_pinned(
        &self,
        conversation_id: &str,
        pinned: bool,
    ) -> Result<(), ApiError> {
        self.state
            .set_conversation_pinned(conversation_id, pinned)
            .await
    }

    /// 会话免打扰；`muted_until` 为 0 取消静音
    pub async fn set_conversation_muted(
        &self,
        conversation_id: &str,
        muted_until: i64,
    ) -> Result<(), ApiError> {
        self.state
            .set_conversation_muted(conversation_id, muted_until)
            .await
    }

    /// 上传媒体文件，返回可作为附件引用的 URL
    pub async fn upload_media(
        &self,
        file_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadResult, ApiError> {
        self.media_api.upload_media(file_name, mime_type, bytes).await
    }

    /// 会话列表快照
    pub fn conversations(&self) -> Vec<Conversation> {
        self.state.conversations()
    }

    /// 当前会话消息窗口快照
    pub fn messages(&self) -> Vec<Message> {
        self.state.messages()
    }

    /// 总未读数
    pub fn total_unread(&self) -> i32 {
        self.state.total_unread()
    }

    /// 本地消息检索（不依赖网络）
    pub async fn search_local_messages(
        &self,
        conversation_id: &str,
        keyword: &str,
    ) -> Vec<Message> {
        self.store.search_messages(conversation_id, keyword).await
    }

    /// 当前配置
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::{ChatClient, ClientConfig};
    use crate::im::message::listener::MessageListener;
    use std::sync::{Arc, Once};
    use tracing::{info, warn};

    static INIT_LOGGER: Once = Once::new();

    fn init_test_logger() {
        INIT_LOGGER.call_once(|| {
            use tracing_subscriber::prelude::*;
            use tracing_subscriber::EnvFilter;

            let filter_layer =
                EnvFilter::new("info,linkchat_sdk_core=debug,sqlx=info,reqwest=info");
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(false)
                .with_test_writer();

            tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt_layer)
                .init();
        });
    }

    #[tokio::test]
    async fn client_builds_with_memory_cache() {
        init_test_logger();
        let mut config = ClientConfig::new("u1".to_string(), "test-token".to_string());
        config.db_url = "sqlite::memory:".to_string();
        let client = ChatClient::new(config).await.unwrap();
        assert!(client.conversations().is_empty());
        assert_eq!(client.total_unread(), 0);
        // 未连接时断开是无操作
        client.disconnect().await;
    }

    /// 端到端冒烟：需要本地聊天服务器，平时跳过
    #[tokio::test]
    #[ignore]
    async fn run_linkchat_client() {
        init_test_logger();

        let config = ClientConfig::new(
            "7226915075".to_string(),
            std::env::var("LINKCHAT_TOKEN").unwrap_or_default(),
        );
        let mut client = ChatClient::new(config).await.unwrap();

        struct SmokeListener;
        #[async_trait::async_trait]
        impl MessageListener for SmokeListener {
            async fn on_message_new(&self, message: String) {
                info!("[回调/消息] 📨 新消息: {}", message);
            }
            async fn on_message_updated(&self, message: String) {
                info!("[回调/消息] ✏️ 消息更新: {}", message);
            }
            async fn on_messages_read(&self, receipt: String) {
                info!("[回调/消息] 📖 已读回执: {}", receipt);
            }
            async fn on_typing_changed(&self, typing: String) {
                info!("[回调/消息] ⌨️ 输入状态: {}", typing);
            }
            async fn on_message_deleted(&self, message_id: String) {
                info!("[回调/消息] 🗑️ 消息删除: {}", message_id);
            }
            async fn on_connection_status_changed(&self, connected: bool, message: String) {
                if connected {
                    info!("[回调/消息] 🔗 已连接: {}", message);
                } else {
                    warn!("[回调/消息] 🔗 断开: {}", message);
                }
            }
        }
        client.set_message_listener(Arc::new(SmokeListener));

        client.connect().await.unwrap();
        client.join_conversation("c1").await.unwrap();
        client
            .send_text_message("c1", "Hello from Rust client!".to_string())
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
    }
}
