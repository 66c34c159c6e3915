//! 消息监听器回调接口
//!
//! UI 层通过此接口接收消息事件；回调参数是事件载荷的 JSON 字符串表示，
//! 跨语言绑定时无需映射具体结构。

use async_trait::async_trait;

/// 消息监听器
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// 收到新消息（他方或本用户其他设备发出）
    async fn on_message_new(&self, message: String);

    /// 消息被编辑 / 回应变化 / 状态变化（整体替换后的记录）
    async fn on_message_updated(&self, message: String);

    /// 一组消息转为已读
    async fn on_messages_read(&self, receipt: String);

    /// 某会话的输入状态集合发生变化
    async fn on_typing_changed(&self, typing: String);

    /// 消息被删除
    async fn on_message_deleted(&self, message_id: String);

    /// 连接状态变化
    async fn on_connection_status_changed(&self, connected: bool, message: String);
}

/// 空的消息监听器实现（默认实现）
pub struct EmptyMessageListener;

#[async_trait]
impl MessageListener for EmptyMessageListener {
    async fn on_message_new(&self, _message: String) {}
    async fn on_message_updated(&self, _message: String) {}
    async fn on_messages_read(&self, _receipt: String) {}
    async fn on_typing_changed(&self, _typing: String) {}
    async fn on_message_deleted(&self, _message_id: String) {}
    async fn on_connection_status_changed(&self, _connected: bool, _message: String) {}
}
