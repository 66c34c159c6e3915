//! 会话监听器回调接口

use async_trait::async_trait;

/// 会话监听器
#[async_trait]
pub trait ConversationListener: Send + Sync {
    /// 会话列表（顺序或内容）变化，参数为列表的 JSON 字符串表示
    async fn on_conversation_list_changed(&self, conversation_list: String);

    /// 总未读消息数变更
    async fn on_total_unread_count_changed(&self, total_unread_count: i32);
}

/// 空实现（默认监听器）
pub struct EmptyConversationListener;

#[async_trait]
impl ConversationListener for EmptyConversationListener {
    async fn on_conversation_list_changed(&self, _conversation_list: String) {}
    async fn on_total_unread_count_changed(&self, _total_unread_count: i32) {}
}
