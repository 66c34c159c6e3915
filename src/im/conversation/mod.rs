//! 会话模块

pub mod api;
pub mod listener;
pub mod models;

pub use api::{ConversationApi, ConversationGateway};
pub use listener::{ConversationListener, EmptyConversationListener};
pub use models::{Conversation, ConversationType, LastMessage};
