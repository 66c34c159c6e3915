//! 消息 HTTP API 客户端
//!
//! 负责所有消息相关的 HTTP 请求。`MessageGateway` 是状态管理器与
//! 离线重放共用的发送口，测试中以 mock 实现替换。

use crate::im::message::models::{Message, OutgoingMessage};
use crate::im::types::{handle_http_response, request_error, ApiError};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

/// 消息网关：网络发送 / 编辑 / 删除 / 拉取的抽象口
#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// 发送消息，成功返回服务器确认的完整消息（权威 ID）
    async fn send_message(&self, draft: &OutgoingMessage) -> Result<Message, ApiError>;

    /// 编辑消息正文，返回服务器侧更新后的完整记录
    async fn update_message(&self, message_id: &str, content: &str) -> Result<Message, ApiError>;

    async fn delete_message(&self, message_id: &str) -> Result<(), ApiError>;

    /// 拉取消息页：`before` 为空取最新一页，否则取该游标之前的更旧消息；
    /// 返回创建时间降序
    async fn list_messages(
        &self,
        conversation_id: &str,
        before: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Message>, ApiError>;

    /// 服务器侧正文检索（search 查询参数）
    async fn search_messages(
        &self,
        conversation_id: &str,
        keyword: &str,
    ) -> Result<Vec<Message>, ApiError>;

    async fn add_reaction(&self, message_id: &str, emoji: &str) -> Result<Message, ApiError>;

    async fn remove_reaction(&self, message_id: &str, emoji: &str) -> Result<Message, ApiError>;

    /// 批量已读上报
    async fn mark_read(
        &self,
        conversation_id: &str,
        message_ids: &[String],
    ) -> Result<(), ApiError>;
}

/// 媒体上传结果
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResult {
    #[serde(rename = "url")]
    pub url: String,
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
    #[serde(rename = "size", default)]
    pub size: i64,
}

/// 消息相关的 HTTP API 客户端
///
/// `client` 应该已经在外部配置好认证拦截器（token 走 default_headers）。
pub struct MessageApi {
    client: reqwest::Client,
    api_base_url: String,
}

impl MessageApi {
    pub fn new(client: reqwest::Client, api_base_url: String) -> Self {
        Self {
            client,
            api_base_url,
        }
    }

    fn operation_id() -> String {
        Uuid::new_v4().to_string()
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
        operation_name: &str,
    ) -> Result<Option<T>, ApiError> {
        let url = format!("{}{}", self.api_base_url, path);
        debug!("[MsgAPI] 📡 {} → {}", operation_name, url);
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", Self::operation_id())
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(operation_name, e))?;
        handle_http_response::<T>(response, operation_name).await
    }

    /// multipart 媒体上传，返回可引用的附件 URL
    pub async fn upload_media(
        &self,
        file_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadResult, ApiError> {
        let url = format!("{}/media/upload", self.api_base_url);
        info!("[MsgAPI] 📤 上传媒体: {} ({} 字节)", file_name, bytes.len());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime_type)
            .map_err(|e| ApiError::Decode(format!("无效的 MIME 类型: {}", e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&url)
            .header("operationID", Self::operation_id())
            .multipart(form)
            .send()
            .await
            .map_err(|e| request_error("媒体上传", e))?;
        handle_http_response::<UploadResult>(response, "媒体上传")
            .await?
            .ok_or_else(|| ApiError::Decode("响应中缺少 data 字段".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct MessagePage {
    #[serde(rename = "messages", default)]
    messages: Vec<Message>,
}

#[async_trait]
impl MessageGateway for MessageApi {
    async fn send_message(&self, draft: &OutgoingMessage) -> Result<Message, ApiError> {
        let body = serde_json::to_value(draft)
            .map_err(|e| ApiError::Decode(format!("序列化发送请求失败: {}", e)))?;
        self.post_json::<Message>("/message/send", body, "发送消息")
            .await?
            .ok_or_else(|| ApiError::Decode("发送响应缺少消息体".to_string()))
    }

    async fn update_message(&self, message_id: &str, content: &str) -> Result<Message, ApiError> {
        self.post_json::<Message>(
            "/message/update",
            serde_json::json!({ "messageID": message_id, "content": content }),
            "编辑消息",
        )
        .await?
        .ok_or_else(|| ApiError::Decode("编辑响应缺少消息体".to_string()))
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), ApiError> {
        self.post_json::<serde_json::Value>(
            "/message/delete",
            serde_json::json!({ "messageID": message_id }),
            "删除消息",
        )
        .await?;
        Ok(())
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        before: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Message>, ApiError> {
        let mut body = serde_json::json!({
            "conversationID": conversation_id,
            "limit": limit,
        });
        if let Some(cursor) = before {
            body["before"] = serde_json::Value::String(cursor.to_string());
        }
        let page = self
            .post_json::<MessagePage>("/message/list", body, "拉取消息")
            .await?
            .unwrap_or(MessagePage { messages: vec![] });
        debug!(
            "[MsgAPI] 拉取消息: conversationID={}, before={:?}, 返回 {} 条",
            conversation_id,
            before,
            page.messages.len()
        );
        Ok(page.messages)
    }

    async fn search_messages(
        &self,
        conversation_id: &str,
        keyword: &str,
    ) -> Result<Vec<Message>, ApiError> {
        let page = self
            .post_json::<MessagePage>(
                "/message/list",
                serde_json::json!({
                    "conversationID": conversation_id,
                    "search": keyword,
                }),
                "检索消息",
            )
            .await?
            .unwrap_or(MessagePage { messages: vec![] });
        Ok(page.messages)
    }

    async fn add_reaction(&self, message_id: &str, emoji: &str) -> Result<Message, ApiError> {
        self.post_json::<Message>(
            "/message/reaction/add",
            serde_json::json!({ "messageID": message_id, "emoji": emoji }),
            "添加回应",
        )
        .await?
        .ok_or_else(|| ApiError::Decode("回应响应缺少消息体".to_string()))
    }

    async fn remove_reaction(&self, message_id: &str, emoji: &str) -> Result<Message, ApiError> {
        self.post_json::<Message>(
            "/message/reaction/remove",
            serde_json::json!({ "messageID": message_id, "emoji": emoji }),
            "移除回应",
        )
        .await?
        .ok_or_else(|| ApiError::Decode("回应响应缺少消息体".to_string()))
    }

    async fn mark_read(
        &self,
        conversation_id: &str,
        message_ids: &[String],
    ) -> Result<(), ApiError> {
        self.post_json::<serde_json::Value>(
            "/message/read",
            serde_json::json!({
                "conversationID": conversation_id,
                "messageIDs": message_ids,
            }),
            "已读上报",
        )
        .await?;
        Ok(())
    }
}
