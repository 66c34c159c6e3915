//! 消息模块
//!
//! - `models`: 消息 / 附件 / 离线条目数据结构
//! - `dao`: 本地消息缓存与离线待发队列
//! - `api`: 消息 HTTP API 与网关抽象
//! - `listener`: UI 回调接口

pub mod api;
pub mod dao;
pub mod listener;
pub mod models;

pub use api::{MessageApi, MessageGateway};
pub use dao::MessageStore;
pub use listener::{EmptyMessageListener, MessageListener};
pub use models::{
    Attachment, LinkPreview, Message, MessageStatus, MessageType, OutboxEntry, OutgoingMessage,
    Reaction,
};
