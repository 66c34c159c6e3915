//! 会话本地模型定义

use serde::{Deserialize, Serialize};

use crate::im::message::models::Message;

/// 会话类型：单聊 / 群聊
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    Direct,
    Group,
}

impl Default for ConversationType {
    fn default() -> Self {
        ConversationType::Direct
    }
}

/// 最新消息摘要（反规范化，会话列表渲染无需加载完整历史）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    #[serde(rename = "messageID")]
    pub message_id: String,
    #[serde(rename = "senderID")]
    pub sender_id: String,
    #[serde(rename = "text", default)]
    pub text: String,
    #[serde(rename = "timestamp")]
    pub timestamp: i64,
}

impl LastMessage {
    /// 从消息生成摘要
    pub fn from_message(msg: &Message) -> Self {
        Self {
            message_id: msg.message_id.clone(),
            sender_id: msg.sender_id.clone(),
            text: msg.summary_text(),
            timestamp: msg.created_at,
        }
    }
}

/// 本地会话数据结构
///
/// 可以直接从服务器返回的 JSON 反序列化，缺失的字段使用默认值。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(rename = "conversationID")]
    pub conversation_id: String,
    #[serde(rename = "type", default)]
    pub conv_type: ConversationType,
    /// 成员 ID 集合（顺序无意义）
    #[serde(rename = "memberIDs", default)]
    pub member_ids: Vec<String>,
    /// 管理员子集（仅群聊）
    #[serde(rename = "adminIDs", default)]
    pub admin_ids: Vec<String>,
    /// 群标题（仅群聊；单聊由 UI 层按对端用户展示）
    #[serde(rename = "title", default)]
    pub title: String,
    #[serde(rename = "avatarURL", default)]
    pub avatar_url: String,
    #[serde(rename = "lastMessage", default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
    /// 当前用户视角的未读数
    #[serde(rename = "unreadCount", default)]
    pub unread_count: i32,
    #[serde(rename = "isPinned", default)]
    pub is_pinned: bool,
    /// 免打扰截止时间戳（毫秒），0 表示未静音
    #[serde(rename = "mutedUntil", default)]
    pub muted_until: i64,
    #[serde(rename = "createdAt", default)]
    pub created_at: i64,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: i64,
}

impl Conversation {
    /// 以新消息刷新摘要与更新时间
    pub fn touch(&mut self, msg: &Message) {
        self.last_message = Some(LastMessage::from_message(msg));
        self.updated_at = msg.created_at.max(self.updated_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_deserializes_with_defaults() {
        let json = r#"{"conversationID":"c1","type":"group","title":"同学群"}"#;
        let conv: Conversation = serde_json::from_str(json).unwrap();
        assert_eq!(conv.conversation_id, "c1");
        assert_eq!(conv.conv_type, ConversationType::Group);
        assert_eq!(conv.unread_count, 0);
        assert!(conv.last_message.is_none());
        assert!(!conv.is_pinned);
    }
}
