//! LinkChat CLI 客户端（测试版）
//!
//! 非交互式 CLI，用于测试和展示 SDK 功能：
//! 启动时通过命令行参数指定用户与 token，连接后展示会话列表并持续
//! 打印收到的消息 / 输入状态 / 已读回执等事件。

use anyhow::Result;
use clap::Parser;
use linkchat_sdk_core::im::client::{ChatClient, ClientConfig};
use linkchat_sdk_core::im::conversation::listener::ConversationListener;
use linkchat_sdk_core::im::message::listener::MessageListener;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

/// LinkChat CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "linkchat-cli")]
#[command(about = "LinkChat CLI 客户端 - 用于测试和展示 SDK 功能", long_about = None)]
struct Args {
    /// 用户 ID
    #[arg(short, long)]
    user: String,

    /// 鉴权 token（也可通过环境变量 LINKCHAT_TOKEN 提供）
    #[arg(short, long, default_value = "")]
    token: String,

    /// WebSocket 服务器地址
    #[arg(long, default_value = "ws://localhost:9601")]
    ws_url: String,

    /// HTTP API 基础地址
    #[arg(long, default_value = "http://localhost:9602")]
    api_url: String,

    /// 本地缓存数据库 URL
    #[arg(long, default_value = "sqlite://linkchat.db?mode=rwc")]
    db_url: String,

    /// 进入指定会话并发送一条测试消息
    #[arg(long)]
    send_to: Option<String>,

    /// 运行时长（秒），0 表示持续运行
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志级别
    #[arg(long, default_value = "info,linkchat_sdk_core=debug")]
    log_level: String,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("无法创建日志文件 debug.log");

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
}

/// 设置监听器（输出所有接收到的信息）
fn setup_listeners(client: &mut ChatClient) {
    struct CliMessageListener;
    #[async_trait::async_trait]
    impl MessageListener for CliMessageListener {
        async fn on_message_new(&self, message: String) {
            info!("[CLI/Message] 📨 收到新消息: {}", message);
        }

        async fn on_message_updated(&self, message: String) {
            info!("[CLI/Message] ✏️ 消息更新: {}", message);
        }

        async fn on_messages_read(&self, receipt: String) {
            info!("[CLI/Message] 📖 已读回执: {}", receipt);
        }

        async fn on_typing_changed(&self, typing: String) {
            info!("[CLI/Message] ⌨️ 输入状态: {}", typing);
        }

        async fn on_message_deleted(&self, message_id: String) {
            info!("[CLI/Message] 🗑️ 消息删除: {}", message_id);
        }

        async fn on_connection_status_changed(&self, connected: bool, message: String) {
            if connected {
                info!("[CLI/Message] 🔗 已连接: {}", message);
            } else {
                error!("[CLI/Message] 🔗 断开连接: {}", message);
            }
        }
    }
    client.set_message_listener(Arc::new(CliMessageListener));

    struct CliConversationListener;
    #[async_trait::async_trait]
    impl ConversationListener for CliConversationListener {
        async fn on_conversation_list_changed(&self, conversation_list: String) {
            info!("[CLI/Conversation] 🔄 会话列表变更: {}", conversation_list);
        }

        async fn on_total_unread_count_changed(&self, total_unread_count: i32) {
            info!("[CLI/Conversation] 📬 总未读数: {}", total_unread_count);
        }
    }
    client.set_conversation_listener(Arc::new(CliConversationListener));
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logger(&args.log_level);

    info!("[CLI] 🚀 LinkChat CLI 客户端（测试模式）");
    info!("[CLI] 👤 用户: {}", args.user);
    info!("[CLI] ⏱️  运行时长: {} 秒（0=持续运行）", args.duration);

    let token = if args.token.is_empty() {
        std::env::var("LINKCHAT_TOKEN").unwrap_or_default()
    } else {
        args.token.clone()
    };
    if token.is_empty() {
        return Err(anyhow::anyhow!(
            "缺少鉴权 token（--token 或环境变量 LINKCHAT_TOKEN）"
        ));
    }

    let mut config = ClientConfig::new(args.user.clone(), token);
    config.ws_url = args.ws_url.clone();
    config.api_base_url = args.api_url.clone();
    config.db_url = args.db_url.clone();

    let mut client = ChatClient::new(config).await?;
    setup_listeners(&mut client);

    info!("[CLI] 🔗 正在连接服务器...");
    client.connect().await?;
    info!("[CLI] ✅ 连接成功！");

    // 给初始会话同步留一点时间再打印列表
    sleep(Duration::from_secs(1)).await;
    let conversations = client.conversations();
    info!("[CLI] 📋 会话列表（共 {} 个）:", conversations.len());
    for conv in conversations.iter().take(5) {
        let latest = conv
            .last_message
            .as_ref()
            .map(|m| m.text.clone())
            .unwrap_or_default();
        info!(
            "[CLI]   - {} | 未读: {} | 最新: {}",
            conv.conversation_id,
            conv.unread_count,
            latest.chars().take(30).collect::<String>()
        );
    }
    info!("[CLI] 📬 总未读数: {}", client.total_unread());

    // 可选：进入会话并发送一条测试消息
    if let Some(conversation_id) = &args.send_to {
        info!("[CLI] 📤 进入会话 {} 并发送测试消息...", conversation_id);
        client.join_conversation(conversation_id).await?;
        match client
            .send_text_message(conversation_id, "Hello from LinkChat CLI!".to_string())
            .await
        {
            Ok(msg) => info!(
                "[CLI] ✅ 消息已提交: messageID={}, status={:?}",
                msg.message_id, msg.status
            ),
            Err(e) => error!("[CLI] ❌ 消息发送失败: {}", e),
        }
    }

    info!("[CLI] 📥 开始监听消息...");
    if args.duration > 0 {
        info!("[CLI] ⏰ {} 秒后自动退出", args.duration);
        sleep(Duration::from_secs(args.duration)).await;
        client.disconnect().await;
        info!("[CLI] 👋 程序退出");
    } else {
        info!("[CLI] ⏰ 持续运行中，按 Ctrl+C 退出");
        loop {
            sleep(Duration::from_secs(3600)).await;
        }
    }

    Ok(())
}
