//! 消息数据访问层（DAO）
//!
//! 本地消息缓存与离线待发队列（sqlx / SQLite）。
//!
//! 缓存不是 system of record：所有操作在本层吞掉存储错误（记日志后返回
//! 空结果 / 无操作），绝不向调用方抛错或阻塞 UI——存储不可用时，流水线
//! 表现为缓存为空。

use crate::im::db::create_sqlite_pool;
use crate::im::message::models::{Message, OutboxEntry};
use anyhow::{Context, Result};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, warn};

/// 本地消息存储
///
/// `messages` 表按消息 ID 主键存完整序列化快照 + 热字段索引列；
/// `pending_messages` 表是离线待发队列，按创建时间 FIFO。
pub struct MessageStore {
    pool: Pool<Sqlite>,
}

impl MessageStore {
    /// 打开（或创建）本地缓存数据库
    ///
    /// 初始化幂等：schema 全部使用 CREATE ... IF NOT EXISTS，
    /// 重复启动不会失败。
    pub async fn new(db_url: &str) -> Result<Self> {
        let pool = create_sqlite_pool(db_url)
            .await
            .with_context(|| format!("打开本地消息缓存失败: {}", db_url))?;
        let store = Self { pool };
        store.ensure_schema().await?;
        info!("[MsgStore] 本地消息缓存已就绪: {}", db_url);
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS messages (
                message_id      TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                sender_id       TEXT NOT NULL,
                status          TEXT NOT NULL,
                content         TEXT NOT NULL DEFAULT '',
                created_at      INTEGER NOT NULL,
                snapshot        TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conv_time
                ON messages(conversation_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_messages_sender
                ON messages(sender_id);

            CREATE TABLE IF NOT EXISTS pending_messages (
                temp_id         TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                content         TEXT NOT NULL DEFAULT '',
                msg_type        TEXT NOT NULL,
                attachments     TEXT NOT NULL DEFAULT '[]',
                created_at      INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_pending_created
                ON pending_messages(created_at);
        "#;
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .context("初始化消息缓存表失败")?;
        Ok(())
    }

    // ========== 消息缓存 ==========

    /// 幂等 upsert 一条消息（按消息 ID）；存储错误吞掉
    pub async fn save_message(&self, msg: &Message) {
        if let Err(e) = self.try_save_message(msg).await {
            warn!("[MsgStore] 写入消息缓存失败（忽略）: {}", e);
        }
    }

    async fn try_save_message(&self, msg: &Message) -> Result<()> {
        let snapshot = serde_json::to_string(msg).context("序列化消息快照失败")?;
        let status = serde_json::to_string(&msg.status)
            .context("序列化消息状态失败")?
            .trim_matches('"')
            .to_string();
        sqlx::query(
            r#"
            INSERT INTO messages (
                message_id, conversation_id, sender_id, status, content, created_at, snapshot
            ) VALUES (?,?,?,?,?,?,?)
            ON CONFLICT(message_id) DO UPDATE SET
                status = excluded.status,
                content = excluded.content,
                snapshot = excluded.snapshot
            "#,
        )
        .bind(&msg.message_id)
        .bind(&msg.conversation_id)
        .bind(&msg.sender_id)
        .bind(&status)
        .bind(&msg.content)
        .bind(msg.created_at)
        .bind(&snapshot)
        .execute(&self.pool)
        .await
        .context("写入消息行失败")?;
        Ok(())
    }

    /// 临时 ID → 服务器 ID 的替换：删旧行、写确认行
    pub async fn replace_message(&self, temp_id: &str, confirmed: &Message) {
        self.delete_message(temp_id).await;
        self.save_message(confirmed).await;
    }

    /// 取某会话最近 N 条消息（创建时间降序）；出错返回空
    pub async fn get_messages(&self, conversation_id: &str, limit: u32) -> Vec<Message> {
        match self.try_get_messages(conversation_id, limit).await {
            Ok(msgs) => msgs,
            Err(e) => {
                warn!("[MsgStore] 读取消息缓存失败（按空缓存处理）: {}", e);
                Vec::new()
            }
        }
    }

    async fn try_get_messages(&self, conversation_id: &str, limit: u32) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT snapshot FROM messages
            WHERE conversation_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("查询消息列表失败")?;
        Ok(Self::rows_to_messages(rows))
    }

    /// 会话内正文子串检索（大小写不敏感），最新在前；出错返回空
    pub async fn search_messages(&self, conversation_id: &str, keyword: &str) -> Vec<Message> {
        match self.try_search_messages(conversation_id, keyword).await {
            Ok(msgs) => msgs,
            Err(e) => {
                warn!("[MsgStore] 本地检索失败（按空结果处理）: {}", e);
                Vec::new()
            }
        }
    }

    async fn try_search_messages(
        &self,
        conversation_id: &str,
        keyword: &str,
    ) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT snapshot FROM messages
            WHERE conversation_id = ? AND content LIKE ?
            ORDER BY created_at DESC
            LIMIT 200
            "#,
        )
        .bind(conversation_id)
        .bind(format!("%{}%", keyword))
        .fetch_all(&self.pool)
        .await
        .context("本地检索查询失败")?;
        Ok(Self::rows_to_messages(rows))
    }

    /// 删除一条缓存行（本地删除路径同步清理缓存）
    pub async fn delete_message(&self, message_id: &str) {
        if let Err(e) = sqlx::query("DELETE FROM messages WHERE message_id = ?")
            .bind(message_id)
            .execute(&self.pool)
            .await
        {
            warn!("[MsgStore] 删除缓存行失败（忽略）: {}", e);
        }
    }

    fn rows_to_messages(rows: Vec<sqlx::sqlite::SqliteRow>) -> Vec<Message> {
        rows.into_iter()
            .filter_map(|row| {
                let snapshot: String = row.try_get("snapshot").ok()?;
                match serde_json::from_str::<Message>(&snapshot) {
                    Ok(msg) => Some(msg),
                    Err(e) => {
                        // 单行损坏不影响其余结果
                        warn!("[MsgStore] 快照解析失败，跳过该行: {}", e);
                        None
                    }
                }
            })
            .collect()
    }

    // ========== 离线待发队列 ==========

    /// 入队一条待发条目（传输失败的发送尝试）
    pub async fn queue_message(&self, entry: &OutboxEntry) {
        if let Err(e) = self.try_queue_message(entry).await {
            warn!("[MsgStore] 离线条目入队失败（忽略）: {}", e);
        }
    }

    async fn try_queue_message(&self, entry: &OutboxEntry) -> Result<()> {
        let attachments =
            serde_json::to_string(&entry.attachments).context("序列化附件列表失败")?;
        let msg_type = serde_json::to_string(&entry.msg_type)
            .context("序列化消息类型失败")?
            .trim_matches('"')
            .to_string();
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO pending_messages (
                temp_id, conversation_id, content, msg_type, attachments, created_at
            ) VALUES (?,?,?,?,?,?)
            "#,
        )
        .bind(&entry.temp_id)
        .bind(&entry.conversation_id)
        .bind(&entry.content)
        .bind(&msg_type)
        .bind(&attachments)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .context("写入离线条目失败")?;
        debug!(
            "[MsgStore] 离线条目入队: tempID={}, conversationID={}",
            entry.temp_id, entry.conversation_id
        );
        Ok(())
    }

    /// 取全部待发条目（创建时间升序，FIFO）；出错返回空
    pub async fn get_pending_messages(&self) -> Vec<OutboxEntry> {
        match self.try_get_pending_messages().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("[MsgStore] 读取离线队列失败（按空队列处理）: {}", e);
                Vec::new()
            }
        }
    }

    async fn try_get_pending_messages(&self) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT temp_id, conversation_id, content, msg_type, attachments, created_at
            FROM pending_messages
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("查询离线队列失败")?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let msg_type: String = row.try_get("msg_type").ok()?;
                let attachments: String = row.try_get("attachments").ok()?;
                Some(OutboxEntry {
                    temp_id: row.try_get("temp_id").ok()?,
                    conversation_id: row.try_get("conversation_id").ok()?,
                    content: row.try_get("content").unwrap_or_default(),
                    msg_type: serde_json::from_str(&format!("\"{}\"", msg_type))
                        .unwrap_or_default(),
                    attachments: serde_json::from_str(&attachments).unwrap_or_default(),
                    created_at: row.try_get("created_at").unwrap_or_default(),
                })
            })
            .collect())
    }

    /// 重放成功后移除待发条目
    pub async fn remove_pending_message(&self, temp_id: &str) {
        if let Err(e) = sqlx::query("DELETE FROM pending_messages WHERE temp_id = ?")
            .bind(temp_id)
            .execute(&self.pool)
            .await
        {
            warn!("[MsgStore] 删除离线条目失败（忽略）: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::message::models::{MessageType, OutboxEntry};
    use chrono::Utc;

    async fn memory_store() -> MessageStore {
        MessageStore::new("sqlite::memory:").await.unwrap()
    }

    fn message(id: &str, conv: &str, content: &str, created_at: i64) -> Message {
        let mut msg = Message::new_outgoing(
            id.to_string(),
            conv.to_string(),
            "u1".to_string(),
            MessageType::Text,
            content.to_string(),
            vec![],
            None,
        );
        msg.created_at = created_at;
        msg
    }

    #[tokio::test]
    async fn save_is_idempotent_upsert() {
        let store = memory_store().await;
        let mut msg = message("m1", "c1", "第一版", 100);
        store.save_message(&msg).await;
        msg.content = "第二版".to_string();
        store.save_message(&msg).await;

        let msgs = store.get_messages("c1", 10).await;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, "第二版");
    }

    #[tokio::test]
    async fn get_messages_newest_first_with_limit() {
        let store = memory_store().await;
        for i in 0..5 {
            store
                .save_message(&message(&format!("m{}", i), "c1", "x", 100 + i))
                .await;
        }
        store.save_message(&message("other", "c2", "x", 999)).await;

        let msgs = store.get_messages("c1", 3).await;
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].message_id, "m4");
        assert_eq!(msgs[2].message_id, "m2");
    }

    #[tokio::test]
    async fn search_scoped_to_conversation() {
        let store = memory_store().await;
        store
            .save_message(&message("m1", "c1", "明天开会", 100))
            .await;
        store
            .save_message(&message("m2", "c1", "好的收到", 200))
            .await;
        store
            .save_message(&message("m3", "c2", "开会地点待定", 300))
            .await;

        let hits = store.search_messages("c1", "开会").await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message_id, "m1");
    }

    #[tokio::test]
    async fn replace_message_swaps_temp_for_server_id() {
        let store = memory_store().await;
        let temp = message("u1-tmp", "c1", "hello", 100);
        store.save_message(&temp).await;

        let mut confirmed = temp.clone();
        confirmed.message_id = "srv-1".to_string();
        store.replace_message("u1-tmp", &confirmed).await;

        let msgs = store.get_messages("c1", 10).await;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].message_id, "srv-1");
    }

    #[tokio::test]
    async fn outbox_is_fifo_by_created_at() {
        let store = memory_store().await;
        let now = Utc::now().timestamp_millis();
        for i in [2i64, 0, 1] {
            store
                .queue_message(&OutboxEntry {
                    temp_id: format!("t{}", i),
                    conversation_id: "c1".to_string(),
                    content: format!("msg {}", i),
                    msg_type: MessageType::Text,
                    attachments: vec![],
                    created_at: now + i,
                })
                .await;
        }
        let pending = store.get_pending_messages().await;
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[0].temp_id, "t0");
        assert_eq!(pending[2].temp_id, "t2");

        store.remove_pending_message("t0").await;
        assert_eq!(store.get_pending_messages().await.len(), 2);
        // 重复删除是无操作
        store.remove_pending_message("t0").await;
        assert_eq!(store.get_pending_messages().await.len(), 2);
    }
}
