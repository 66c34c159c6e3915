//! 消息本地模型定义
//!
//! 消息、附件、回应（reaction）、链接预览以及离线待发条目的数据结构。
//! 字段命名与服务器 JSON 协议对齐（camelCase / *ID）。

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Video,
    File,
    Voice,
    System,
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Text
    }
}

/// 消息投递状态
///
/// 正常路径 pending → sent → delivered → read；failed 仅在服务器明确拒绝时进入。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// 状态单调序，用于丢弃乱序到达的旧状态事件
    pub fn rank(self) -> i32 {
        match self {
            MessageStatus::Pending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
            // failed 不参与单调序，单独处理
            MessageStatus::Failed => -1,
        }
    }
}

/// 附件（图片 / 视频 / 文件 / 语音共用结构）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "url")]
    pub url: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    #[serde(rename = "size")]
    pub size: i64,
    /// 文件名（文件类附件使用）
    #[serde(rename = "name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// 时长（毫秒，语音/视频附件使用）
    #[serde(rename = "duration", default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

/// 消息回应（emoji reaction）
///
/// 约束：同一 (userID, emoji) 至多存在一条，重复添加即为取消。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "emoji")]
    pub emoji: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

/// 链接预览
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkPreview {
    #[serde(rename = "url")]
    pub url: String,
    #[serde(rename = "title", default)]
    pub title: String,
    #[serde(rename = "description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "imageURL", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// 消息结构体
///
/// `message_id` 在服务器确认前是客户端生成的临时 ID，确认后被服务器 ID
/// 整体替换（替换而非追加，两个 ID 不会同时出现在 UI 状态里）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "messageID")]
    pub message_id: String,
    #[serde(rename = "conversationID")]
    pub conversation_id: String,
    #[serde(rename = "senderID")]
    pub sender_id: String,
    #[serde(rename = "type", default)]
    pub msg_type: MessageType,
    /// 正文；附件消息正文可以为空
    #[serde(rename = "content", default)]
    pub content: String,
    #[serde(rename = "attachments", default)]
    pub attachments: Vec<Attachment>,
    #[serde(rename = "status")]
    pub status: MessageStatus,
    /// 已送达的接收方
    #[serde(rename = "deliveredTo", default)]
    pub delivered_to: Vec<String>,
    /// 已读的接收方
    #[serde(rename = "readBy", default)]
    pub read_by: Vec<String>,
    #[serde(rename = "reactions", default)]
    pub reactions: Vec<Reaction>,
    /// 被引用消息 ID
    #[serde(rename = "replyTo", default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(rename = "editedAt", default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<i64>,
    /// 软删除时间戳
    #[serde(rename = "deletedAt", default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
    #[serde(rename = "linkPreview", default, skip_serializing_if = "Option::is_none")]
    pub link_preview: Option<LinkPreview>,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

impl Message {
    /// 构造一条本地乐观消息（临时 ID + pending 状态）
    pub fn new_outgoing(
        temp_id: String,
        conversation_id: String,
        sender_id: String,
        msg_type: MessageType,
        content: String,
        attachments: Vec<Attachment>,
        reply_to: Option<String>,
    ) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            message_id: temp_id,
            conversation_id,
            sender_id,
            msg_type,
            content,
            attachments,
            status: MessageStatus::Pending,
            delivered_to: Vec::new(),
            read_by: Vec::new(),
            reactions: Vec::new(),
            reply_to,
            edited_at: None,
            deleted_at: None,
            link_preview: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 会话列表摘要文案（非文本消息按类型给固定标签）
    pub fn summary_text(&self) -> String {
        if self.deleted_at.is_some() {
            return "[消息已删除]".to_string();
        }
        match self.msg_type {
            MessageType::Text | MessageType::System => {
                if self.content.is_empty() {
                    "[新消息]".to_string()
                } else {
                    self.content.clone()
                }
            }
            MessageType::Image => "[图片]".to_string(),
            MessageType::Video => "[视频]".to_string(),
            MessageType::File => "[文件]".to_string(),
            MessageType::Voice => "[语音]".to_string(),
        }
    }

    /// 切换一条回应：(user, emoji) 已存在则移除，否则追加。
    /// 返回 `true` 表示本次为添加。
    pub fn toggle_reaction(&mut self, user_id: &str, emoji: &str) -> bool {
        if let Some(pos) = self
            .reactions
            .iter()
            .position(|r| r.user_id == user_id && r.emoji == emoji)
        {
            self.reactions.remove(pos);
            false
        } else {
            self.reactions.push(Reaction {
                user_id: user_id.to_string(),
                emoji: emoji.to_string(),
                created_at: Utc::now().timestamp_millis(),
            });
            true
        }
    }
}

/// 待发送消息草稿（发送路径与离线重放共用的出参结构）
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMessage {
    /// 客户端临时 ID，服务器原样回传用于关联确认
    #[serde(rename = "tempID")]
    pub temp_id: String,
    #[serde(rename = "conversationID")]
    pub conversation_id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(rename = "content")]
    pub content: String,
    #[serde(rename = "attachments")]
    pub attachments: Vec<Attachment>,
    #[serde(rename = "replyTo", skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

/// 离线待发队列条目
///
/// 生命周期：传输层发送失败时创建；重放成功后删除；从不就地修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    #[serde(rename = "tempID")]
    pub temp_id: String,
    #[serde(rename = "conversationID")]
    pub conversation_id: String,
    #[serde(rename = "content", default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub msg_type: MessageType,
    #[serde(rename = "attachments", default)]
    pub attachments: Vec<Attachment>,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

impl OutboxEntry {
    /// 从乐观消息构造队列条目
    pub fn from_message(msg: &Message) -> Self {
        Self {
            temp_id: msg.message_id.clone(),
            conversation_id: msg.conversation_id.clone(),
            content: msg.content.clone(),
            msg_type: msg.msg_type,
            attachments: msg.attachments.clone(),
            created_at: msg.created_at,
        }
    }

    /// 转为重放用的发送草稿（沿用原临时 ID 以便关联）
    pub fn to_outgoing(&self) -> OutgoingMessage {
        OutgoingMessage {
            temp_id: self.temp_id.clone(),
            conversation_id: self.conversation_id.clone(),
            msg_type: self.msg_type,
            content: self.content.clone(),
            attachments: self.attachments.clone(),
            reply_to: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_message(id: &str) -> Message {
        Message::new_outgoing(
            id.to_string(),
            "c1".to_string(),
            "u1".to_string(),
            MessageType::Text,
            "hello".to_string(),
            vec![],
            None,
        )
    }

    #[test]
    fn reaction_toggle_add_then_remove() {
        let mut msg = text_message("m1");
        assert!(msg.toggle_reaction("u2", "👍"));
        assert_eq!(msg.reactions.len(), 1);
        // 再次添加同一 (user, emoji) 即为取消
        assert!(!msg.toggle_reaction("u2", "👍"));
        assert!(msg.reactions.is_empty());
    }

    #[test]
    fn reaction_toggle_distinct_emojis_coexist() {
        let mut msg = text_message("m1");
        msg.toggle_reaction("u2", "👍");
        msg.toggle_reaction("u2", "🎉");
        assert_eq!(msg.reactions.len(), 2);
    }

    #[test]
    fn status_rank_is_monotonic() {
        assert!(MessageStatus::Sent.rank() > MessageStatus::Pending.rank());
        assert!(MessageStatus::Delivered.rank() > MessageStatus::Sent.rank());
        assert!(MessageStatus::Read.rank() > MessageStatus::Delivered.rank());
    }

    #[test]
    fn message_roundtrips_through_json() {
        let mut msg = text_message("m1");
        msg.attachments.push(Attachment {
            url: "https://cdn.example.com/a.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            size: 1024,
            name: None,
            duration: None,
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"messageID\":\"m1\""));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message_id, msg.message_id);
        assert_eq!(back.attachments, msg.attachments);
        assert_eq!(back.status, MessageStatus::Pending);
    }

    #[test]
    fn summary_text_labels_by_type() {
        let mut msg = text_message("m1");
        assert_eq!(msg.summary_text(), "hello");
        msg.msg_type = MessageType::Image;
        assert_eq!(msg.summary_text(), "[图片]");
        msg.deleted_at = Some(1);
        assert_eq!(msg.summary_text(), "[消息已删除]");
    }
}
