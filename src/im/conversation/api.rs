//! 会话 HTTP API 客户端
//!
//! 负责所有会话相关的 HTTP 请求

use crate::im::conversation::models::Conversation;
use crate::im::types::{handle_http_response, request_error, ApiError};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

/// 会话网关：会话列表 / 创建 / 置顶 / 静音的抽象口
#[async_trait]
pub trait ConversationGateway: Send + Sync {
    /// 按 offset 分页拉取会话列表（offset=0 对应下拉刷新语义）
    async fn list_conversations(
        &self,
        offset: u32,
        count: u32,
    ) -> Result<Vec<Conversation>, ApiError>;

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, ApiError>;

    /// 创建会话（单聊给一个成员，群聊给成员列表 + 标题）
    async fn create_conversation(
        &self,
        member_ids: &[String],
        title: Option<&str>,
    ) -> Result<Conversation, ApiError>;

    /// 更新会话资料（群标题 / 头像），返回服务器侧更新后的记录
    async fn update_conversation(
        &self,
        conversation_id: &str,
        title: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<Conversation, ApiError>;

    async fn set_pinned(&self, conversation_id: &str, pinned: bool) -> Result<(), ApiError>;

    /// muted_until=0 表示取消静音
    async fn set_muted_until(&self, conversation_id: &str, muted_until: i64)
        -> Result<(), ApiError>;
}

/// 会话相关的 HTTP API 客户端
///
/// `client` 应该已经在外部配置好认证拦截器
pub struct ConversationApi {
    client: reqwest::Client,
    api_base_url: String,
    user_id: String,
}

impl ConversationApi {
    pub fn new(client: reqwest::Client, api_base_url: String, user_id: String) -> Self {
        Self {
            client,
            api_base_url,
            user_id,
        }
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
        operation_name: &str,
    ) -> Result<Option<T>, ApiError> {
        let url = format!("{}{}", self.api_base_url, path);
        let operation_id = Uuid::new_v4().to_string();
        debug!(
            "[ConvAPI] 📡 {} → {}, 操作ID: {}",
            operation_name, url, operation_id
        );
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(operation_name, e))?;
        handle_http_response::<T>(response, operation_name).await
    }
}

#[derive(Debug, Deserialize)]
struct ConversationPage {
    #[serde(rename = "conversations", default)]
    conversations: Vec<Conversation>,
}

#[async_trait]
impl ConversationGateway for ConversationApi {
    async fn list_conversations(
        &self,
        offset: u32,
        count: u32,
    ) -> Result<Vec<Conversation>, ApiError> {
        let page = self
            .post_json::<ConversationPage>(
                "/conversation/list",
                serde_json::json!({
                    "userID": self.user_id,
                    "offset": offset,
                    "count": count,
                }),
                "拉取会话列表",
            )
            .await?
            .unwrap_or(ConversationPage {
                conversations: vec![],
            });
        info!(
            "[ConvAPI] ✅ 会话列表响应: offset={}, 返回 {} 个会话",
            offset,
            page.conversations.len()
        );
        Ok(page.conversations)
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, ApiError> {
        self.post_json::<Conversation>(
            "/conversation/get",
            serde_json::json!({ "conversationID": conversation_id }),
            "拉取单个会话",
        )
        .await?
        .ok_or_else(|| ApiError::Decode("响应中缺少 data 字段".to_string()))
    }

    async fn create_conversation(
        &self,
        member_ids: &[String],
        title: Option<&str>,
    ) -> Result<Conversation, ApiError> {
        self.post_json::<Conversation>(
            "/conversation/create",
            serde_json::json!({
                "ownerUserID": self.user_id,
                "memberIDs": member_ids,
                "title": title,
            }),
            "创建会话",
        )
        .await?
        .ok_or_else(|| ApiError::Decode("创建会话响应缺少 data".to_string()))
    }

    async fn update_conversation(
        &self,
        conversation_id: &str,
        title: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<Conversation, ApiError> {
        self.post_json::<Conversation>(
            "/conversation/update",
            serde_json::json!({
                "conversationID": conversation_id,
                "title": title,
                "avatarURL": avatar_url,
            }),
            "更新会话",
        )
        .await?
        .ok_or_else(|| ApiError::Decode("更新会话响应缺少 data".to_string()))
    }

    async fn set_pinned(&self, conversation_id: &str, pinned: bool) -> Result<(), ApiError> {
        let path = if pinned {
            "/conversation/pin"
        } else {
            "/conversation/unpin"
        };
        self.post_json::<serde_json::Value>(
            path,
            serde_json::json!({ "conversationID": conversation_id }),
            "会话置顶",
        )
        .await?;
        Ok(())
    }

    async fn set_muted_until(
        &self,
        conversation_id: &str,
        muted_until: i64,
    ) -> Result<(), ApiError> {
        let path = if muted_until > 0 {
            "/conversation/mute"
        } else {
            "/conversation/unmute"
        };
        self.post_json::<serde_json::Value>(
            path,
            serde_json::json!({
                "conversationID": conversation_id,
                "mutedUntil": muted_until,
            }),
            "会话静音",
        )
        .await?;
        Ok(())
    }
}
