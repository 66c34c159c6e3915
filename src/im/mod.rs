pub mod client;
pub mod connectivity;
pub mod conversation;
pub mod db;
pub mod message;
pub mod outbox;
pub mod serialization;
pub mod state;
pub mod transport;
pub mod types;

pub use client::{ChatClient, ClientConfig};
pub use connectivity::ConnectivityMonitor;
pub use conversation::{Conversation, ConversationListener, ConversationType, LastMessage};
pub use message::{
    Attachment, Message, MessageListener, MessageStatus, MessageStore, MessageType, OutboxEntry,
};
pub use outbox::OutboxReconciler;
pub use state::ChatStateManager;
pub use transport::{ChannelConfig, EventChannel};
pub use types::{ApiError, ClientCommand, ReadReceipt, ServerEvent, TypingUpdate};
