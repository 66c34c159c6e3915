//! 协议类型定义
//!
//! 事件通道的入站/出站帧（封闭 tagged union，在传输边界解码校验）、
//! 统一的 HTTP 响应包装以及错误分类。

use serde::{Deserialize, Serialize};

use crate::im::message::models::Message;

/// 事件名常量（订阅 / 分发用）
pub mod event_name {
    pub const MESSAGE_NEW: &str = "message:new";
    pub const MESSAGE_UPDATE: &str = "message:update";
    pub const TYPING_UPDATE: &str = "typing:update";
    pub const MESSAGE_READ: &str = "message:read";
}

/// 输入状态变更事件载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingUpdate {
    #[serde(rename = "conversationID")]
    pub conversation_id: String,
    /// 正在输入用户的展示名
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(rename = "isTyping")]
    pub is_typing: bool,
}

/// 批量已读回执载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceipt {
    #[serde(rename = "conversationID")]
    pub conversation_id: String,
    #[serde(rename = "messageIDs")]
    pub message_ids: Vec<String>,
    #[serde(rename = "readerID")]
    pub reader_id: String,
    #[serde(rename = "readAt", default)]
    pub read_at: i64,
}

/// 服务器推送事件（入站帧）
///
/// 帧格式 `{"event": "<名称>", "data": {...}}`；未知事件名在解码处拒绝，
/// 状态管理器只消费已校验的类型化事件。
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// 他方（或本用户其他设备）新建的消息
    #[serde(rename = "message:new")]
    MessageNew(Message),
    /// 编辑 / 回应 / 状态变化，按 ID 整体替换
    #[serde(rename = "message:update")]
    MessageUpdate(Message),
    #[serde(rename = "typing:update")]
    TypingUpdate(TypingUpdate),
    /// 一组消息批量转为已读
    #[serde(rename = "message:read")]
    MessageRead(ReadReceipt),
}

impl ServerEvent {
    /// 事件名（与订阅键一致）
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::MessageNew(_) => event_name::MESSAGE_NEW,
            ServerEvent::MessageUpdate(_) => event_name::MESSAGE_UPDATE,
            ServerEvent::TypingUpdate(_) => event_name::TYPING_UPDATE,
            ServerEvent::MessageRead(_) => event_name::MESSAGE_READ,
        }
    }
}

/// 客户端控制帧（出站，fire-and-forget，不做传输层确认）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientCommand {
    #[serde(rename = "join_conversation")]
    JoinConversation {
        #[serde(rename = "conversationID")]
        conversation_id: String,
    },
    #[serde(rename = "leave_conversation")]
    LeaveConversation {
        #[serde(rename = "conversationID")]
        conversation_id: String,
    },
    /// 输入状态信号（防抖由调用方负责）
    #[serde(rename = "typing")]
    Typing {
        #[serde(rename = "conversationID")]
        conversation_id: String,
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },
    #[serde(rename = "read_messages")]
    ReadMessages {
        #[serde(rename = "conversationID")]
        conversation_id: String,
        #[serde(rename = "messageIDs")]
        message_ids: Vec<String>,
    },
}

/// API / 传输错误分类
///
/// `Network` 属于可恢复的瞬时失败（发送路径转入离线队列，读取路径回退本地
/// 缓存）；`Server` 是服务器明确拒绝，需要以用户可见错误呈现。
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("网络请求失败: {0}")]
    Network(String),
    #[error("服务器错误 {code}: {message}")]
    Server { code: i32, message: String },
    #[error("响应解析失败: {0}")]
    Decode(String),
}

impl ApiError {
    /// 是否为传输层 / 网络故障（进入离线队列重试的判据）
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }
}

/// 统一的 API 响应包装结构体（包含 errCode、errMsg、data）
/// data 字段可能为 null 或缺失，因此使用 Option<T>
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(rename = "errCode")]
    pub err_code: i32,
    #[serde(rename = "errMsg", default)]
    pub err_msg: String,
    pub data: Option<T>,
}

/// 通用 HTTP 响应处理：校验 HTTP 状态与业务错误码后反序列化 data 字段。
/// 所有 API 共用此方法。
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> Result<Option<T>, ApiError> {
    use tracing::{debug, error};

    let status = response.status();

    // body 只能读取一次，先取 bytes
    let body_bytes = response
        .bytes()
        .await
        .map_err(|e| ApiError::Network(format!("读取响应 body 失败: {}", e)))?;

    if !status.is_success() {
        let body_str = String::from_utf8_lossy(&body_bytes);
        error!(
            "[HTTP] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body_str
        );
        return Err(ApiError::Server {
            code: status.as_u16() as i32,
            message: body_str.into_owned(),
        });
    }
    debug!("[HTTP] {}请求成功，HTTP状态: {}", operation_name, status);

    let api_resp: ApiResponse<T> = serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[HTTP] {}反序列化失败: {}\n原始响应: {}",
            operation_name,
            e,
            String::from_utf8_lossy(&body_bytes)
        );
        ApiError::Decode(format!("{}", e))
    })?;

    if api_resp.err_code != 0 {
        error!(
            "[HTTP] {}服务器错误，错误码: {}, 错误信息: {}",
            operation_name, api_resp.err_code, api_resp.err_msg
        );
        return Err(ApiError::Server {
            code: api_resp.err_code,
            message: api_resp.err_msg,
        });
    }

    Ok(api_resp.data)
}

/// 发送阶段的 reqwest 错误统一归类为网络故障
pub fn request_error(operation_name: &str, e: reqwest::Error) -> ApiError {
    tracing::warn!("[HTTP] {}请求未达服务器: {}", operation_name, e);
    ApiError::Network(format!("{}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_event_decodes_message_new() {
        let json = r#"{
            "event": "message:new",
            "data": {
                "messageID": "srv-1",
                "conversationID": "c1",
                "senderID": "u2",
                "type": "text",
                "content": "hi",
                "status": "sent",
                "createdAt": 1700000000000,
                "updatedAt": 1700000000000
            }
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.name(), event_name::MESSAGE_NEW);
        match event {
            ServerEvent::MessageNew(msg) => {
                assert_eq!(msg.message_id, "srv-1");
                assert_eq!(msg.content, "hi");
            }
            other => panic!("预期 MessageNew，实际 {:?}", other),
        }
    }

    #[test]
    fn server_event_rejects_unknown_name() {
        let json = r#"{"event": "presence:update", "data": {}}"#;
        assert!(serde_json::from_str::<ServerEvent>(json).is_err());
    }

    #[test]
    fn client_command_encodes_with_event_tag() {
        let cmd = ClientCommand::Typing {
            conversation_id: "c1".to_string(),
            is_typing: true,
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["event"], "typing");
        assert_eq!(json["data"]["conversationID"], "c1");
        assert_eq!(json["data"]["isTyping"], true);
    }

    #[test]
    fn api_error_classifies_transport() {
        assert!(ApiError::Network("超时".into()).is_transport());
        assert!(!ApiError::Server {
            code: 1004,
            message: "会话不存在".into()
        }
        .is_transport());
    }
}
