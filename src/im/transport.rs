//! 事件通道（WebSocket 传输客户端）
//!
//! 携带鉴权 token 建连；断线自动重连（有界尝试 + 固定退避）。
//! 入站帧在本层解码为类型化事件后按事件名分发给订阅者；出站控制帧
//! fire-and-forget，不做传输层确认（送达语义由消息状态承载）。
//!
//! 断线不向调用方抛错，只通过状态回调可见。重复 connect / 未连接时
//! disconnect 都是无操作。

use crate::im::serialization::{decode_event, encode_command};
use crate::im::types::{ClientCommand, ServerEvent};
use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::interval;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

/// WebSocket 写入端类型别名
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// WebSocket 读取端类型别名
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// 按事件名注册的异步回调
pub type EventHandler = Arc<dyn Fn(ServerEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// 连接状态回调（connected, 说明文案）
pub type StatusHandler = Arc<dyn Fn(bool, String) + Send + Sync>;

// 重连 / 心跳策略常量，按部署调优
const RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// 事件通道配置
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// WebSocket 服务器 URL
    pub ws_url: String,
    /// 鉴权 token（建连时随 URL 携带）
    pub token: String,
    /// 用户 ID
    pub user_id: String,
    /// 压缩方式，"gzip" 或空字符串表示不压缩
    pub compression: String,
}

/// 事件通道
#[derive(Clone)]
pub struct EventChannel {
    config: ChannelConfig,
    writer: Arc<Mutex<Option<WsWriter>>>,
    handlers: Arc<RwLock<HashMap<String, EventHandler>>>,
    status_handler: Arc<RwLock<Option<StatusHandler>>>,
    connected: Arc<AtomicBool>,
    /// 显式断开后置位，抑制自动重连
    closed: Arc<AtomicBool>,
}

impl EventChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            writer: Arc::new(Mutex::new(None)),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            status_handler: Arc::new(RwLock::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 注册一个事件订阅；同名事件的旧订阅被替换
    pub fn subscribe(&self, event: &str, handler: EventHandler) {
        self.handlers
            .write()
            .unwrap()
            .insert(event.to_string(), handler);
    }

    /// 移除一个事件订阅
    pub fn unsubscribe(&self, event: &str) {
        self.handlers.write().unwrap().remove(event);
    }

    /// 注册连接状态回调
    pub fn set_status_handler(&self, handler: StatusHandler) {
        *self.status_handler.write().unwrap() = Some(handler);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn build_url(&self) -> String {
        let compression_param = if self.config.compression.is_empty() {
            String::new()
        } else {
            format!("&compression={}", self.config.compression)
        };
        format!(
            "{}/?token={}&userID={}{}",
            self.config.ws_url, self.config.token, self.config.user_id, compression_param
        )
    }

    /// 连接到服务器（已连接时为无操作）
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            debug!("[Transport] connect 被忽略：已连接");
            return Ok(());
        }
        self.closed.store(false, Ordering::SeqCst);
        self.connect_with_retry().await
    }

    /// 有界重试 + 固定退避
    async fn connect_with_retry(&self) -> Result<()> {
        let mut last_err = None;
        for attempt in 1..=RECONNECT_ATTEMPTS {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(());
            }
            match self.connect_once().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        "[Transport] ⚠️ 第 {}/{} 次连接失败: {}",
                        attempt, RECONNECT_ATTEMPTS, e
                    );
                    last_err = Some(e);
                    if attempt < RECONNECT_ATTEMPTS {
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("连接失败")))
    }

    async fn connect_once(&self) -> Result<()> {
        let url = self.build_url();
        info!(
            "[Transport] 🔗 连接聊天服务器 (user={})",
            self.config.user_id
        );
        let (ws_stream, response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&url))
            .await
            .context("连接超时")??;
        info!("[Transport] ✅ WebSocket 连接成功, 状态: {}", response.status());

        let (write, read) = ws_stream.split();
        *self.writer.lock().await = Some(write);
        self.connected.store(true, Ordering::SeqCst);
        self.notify_status(true, "连接成功");

        // 心跳
        let chan = self.clone();
        tokio::spawn(async move { chan.heartbeat_loop().await });

        // 读循环
        let chan = self.clone();
        tokio::spawn(async move { chan.read_loop(read).await });
        Ok(())
    }

    async fn heartbeat_loop(&self) {
        let mut ticker = interval(HEARTBEAT_INTERVAL);
        ticker.tick().await; // 首个 tick 立即完成，跳过
        loop {
            ticker.tick().await;
            if !self.is_connected() {
                break;
            }
            let mut guard = self.writer.lock().await;
            match guard.as_mut() {
                Some(w) => {
                    if w.send(WsMessage::Ping(vec![])).await.is_err() {
                        break;
                    }
                }
                None => break,
            }
        }
    }

    /// 处理接收消息（事件循环）
    async fn read_loop(&self, mut read: WsReader) {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => self.dispatch(text.as_bytes()),
                Ok(WsMessage::Binary(data)) => self.dispatch(&data),
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
                Ok(WsMessage::Close(frame)) => {
                    warn!("[Transport] 👋 连接关闭: {:?}", frame);
                    break;
                }
                Err(e) => {
                    error!("[Transport] WebSocket 错误: {}", e);
                    break;
                }
                _ => {}
            }
        }
        self.handle_disconnect().await;
    }

    /// 解码并按事件名分发；无法解析的帧丢弃（记日志）
    fn dispatch(&self, data: &[u8]) {
        match decode_event(data) {
            Ok(event) => {
                let handler = self.handlers.read().unwrap().get(event.name()).cloned();
                match handler {
                    Some(h) => {
                        tokio::spawn(h(event));
                    }
                    None => debug!("[Transport] 事件无订阅者: {}", event.name()),
                }
            }
            Err(e) => warn!("[Transport] 丢弃无法解析的帧: {}", e),
        }
    }

    async fn handle_disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        *self.writer.lock().await = None;
        self.notify_status(false, "连接断开");

        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        info!("[Transport] 🔄 连接丢失，启动自动重连");
        tokio::spawn(self.clone().reconnect_task());
    }

    // BoxFuture 打断 read_loop → 重连 → read_loop 的类型递归
    fn reconnect_task(self) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if let Err(e) = self.connect_with_retry().await {
                error!(
                    "[Transport] ❌ 自动重连未成功，等待连通性恢复再触发: {}",
                    e
                );
            }
        })
    }

    /// fire-and-forget 发送一条控制帧；未连接时返回错误由调用方决定降级
    pub async fn send(&self, cmd: &ClientCommand) -> Result<()> {
        let frame = if self.config.compression == "gzip" {
            WsMessage::Binary(encode_command(cmd, "gzip")?)
        } else {
            WsMessage::Text(serde_json::to_string(cmd).context("序列化控制帧失败")?)
        };
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("未连接"))?;
        writer.send(frame).await.context("发送控制帧失败")?;
        Ok(())
    }

    /// 断开连接（未连接时为无操作），不再自动重连
    pub async fn disconnect(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        let mut guard = self.writer.lock().await;
        if let Some(mut w) = guard.take() {
            let _ = w.send(WsMessage::Close(None)).await;
        }
        if was_connected {
            self.notify_status(false, "主动断开");
            info!("[Transport] 👋 已断开连接");
        }
    }

    fn notify_status(&self, connected: bool, message: &str) {
        let handler = self.status_handler.read().unwrap().clone();
        if let Some(h) = handler {
            h(connected, message.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::types::event_name;
    use tokio::sync::mpsc;

    fn channel_to(addr: &str) -> EventChannel {
        EventChannel::new(ChannelConfig {
            ws_url: format!("ws://{}", addr),
            token: "test-token".to_string(),
            user_id: "u1".to_string(),
            compression: String::new(),
        })
    }

    #[tokio::test]
    async fn dispatch_routes_by_subscription() {
        let channel = channel_to("127.0.0.1:1");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tx2 = tx.clone();
        channel.subscribe(
            event_name::TYPING_UPDATE,
            Arc::new(move |event| {
                let tx = tx2.clone();
                Box::pin(async move {
                    let _ = tx.send(event.name());
                })
            }),
        );

        let frame = br#"{
            "event": "typing:update",
            "data": {"conversationID": "c1", "userName": "Ana", "isTyping": true}
        }"#;
        channel.dispatch(frame);
        assert_eq!(rx.recv().await, Some(event_name::TYPING_UPDATE));

        // 退订后不再分发
        channel.unsubscribe(event_name::TYPING_UPDATE);
        channel.dispatch(frame);
        drop(tx);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn loopback_delivers_subscribed_events() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // 本地回环服务端：接受握手后推送一条事件帧
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let frame = r#"{
                "event": "message:new",
                "data": {
                    "messageID": "srv-1",
                    "conversationID": "c1",
                    "senderID": "u2",
                    "type": "text",
                    "content": "loopback",
                    "status": "sent",
                    "createdAt": 1,
                    "updatedAt": 1
                }
            }"#;
            ws.send(WsMessage::Text(frame.to_string())).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let channel = channel_to(&addr.to_string());
        let (tx, mut rx) = mpsc::unbounded_channel();
        channel.subscribe(
            event_name::MESSAGE_NEW,
            Arc::new(move |event| {
                let tx = tx.clone();
                Box::pin(async move {
                    if let ServerEvent::MessageNew(msg) = event {
                        let _ = tx.send(msg.content);
                    }
                })
            }),
        );

        channel.connect().await.unwrap();
        assert!(channel.is_connected());

        let content = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(content, "loopback");

        channel.disconnect().await;
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn disconnect_when_not_connected_is_noop() {
        let channel = channel_to("127.0.0.1:1");
        // 不触发回调也不报错
        channel.disconnect().await;
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn send_without_connection_surfaces_error() {
        let channel = channel_to("127.0.0.1:1");
        let err = channel
            .send(&ClientCommand::Typing {
                conversation_id: "c1".to_string(),
                is_typing: true,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("未连接"));
    }
}
