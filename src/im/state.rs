//! 会话 / 消息状态管理器（合并引擎）
//!
//! 内存态的 UI 事实来源：把本地缓存、乐观写入和服务器事件合并成
//! 每个会话一份有序视图。所有内存态变更都必须经过本模块的方法
//! （命令模式），其他组件不直接改动消息或会话记录。
//!
//! 合并规则：
//! - 入站消息按 ID 去重，只追加到当前查看的会话窗口；
//! - 临时 ID → 服务器 ID 是整体替换，绝不追加；
//! - 状态变更单调生效（pending → sent → delivered → read），乱序旧事件被丢弃；
//! - `message:update` 按 ID 整体替换（last-writer-wins，不做字段级合并）。

use crate::im::conversation::api::ConversationGateway;
use crate::im::conversation::models::{Conversation, ConversationType, LastMessage};
use crate::im::message::api::MessageGateway;
use crate::im::message::dao::MessageStore;
use crate::im::message::models::{
    Attachment, Message, MessageStatus, MessageType, OutboxEntry, OutgoingMessage,
};
use crate::im::serialization::generate_temp_id;
use crate::im::types::{ApiError, ReadReceipt, TypingUpdate};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 消息分页大小
const MESSAGE_PAGE_SIZE: u32 = 20;
/// 会话分页大小
const CONVERSATION_PAGE_SIZE: u32 = 20;
/// typing 条目的隐式过期时间（对端掉线收不到停止事件时兜底）
const TYPING_EXPIRE: Duration = Duration::from_secs(10);

struct TypingEntry {
    user_name: String,
    since: Instant,
}

#[derive(Default)]
struct ChatState {
    /// 展示顺序的会话列表（最近活跃在前）
    conversations: Vec<Conversation>,
    /// 当前查看的会话
    active_conversation: Option<String>,
    /// 当前会话的消息窗口，创建时间升序
    messages: Vec<Message>,
    /// 是否还有更旧的历史可向前翻页
    has_more: bool,
    typing: HashMap<String, Vec<TypingEntry>>,
}

impl ChatState {
    fn is_active(&self, conversation_id: &str) -> bool {
        self.active_conversation.as_deref() == Some(conversation_id)
    }

    fn find_message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| m.message_id == message_id)
    }

    /// 以新消息刷新会话摘要与列表顺序：摘要更新对所有会话生效
    /// （后台会话也要保证列表新鲜度），且会话移动到列表首位。
    fn touch_conversation(&mut self, msg: &Message, bump_unread: bool) {
        let mut conv = match self
            .conversations
            .iter()
            .position(|c| c.conversation_id == msg.conversation_id)
        {
            Some(i) => self.conversations.remove(i),
            // 事件可能先于会话同步到达：建骨架条目占位
            None => Conversation {
                conversation_id: msg.conversation_id.clone(),
                conv_type: ConversationType::Direct,
                member_ids: Vec::new(),
                admin_ids: Vec::new(),
                title: String::new(),
                avatar_url: String::new(),
                last_message: None,
                unread_count: 0,
                is_pinned: false,
                muted_until: 0,
                created_at: msg.created_at,
                updated_at: msg.created_at,
            },
        };
        if msg.deleted_at.is_none() {
            conv.touch(msg);
        }
        if bump_unread {
            conv.unread_count += 1;
        }
        self.conversations.insert(0, conv);
    }

    /// 摘要指向的消息被删除后，以窗口内最新的未删除消息重算摘要
    fn recompute_summary(&mut self, conversation_id: &str) {
        if !self.is_active(conversation_id) {
            return;
        }
        let latest = self
            .messages
            .iter()
            .rev()
            .find(|m| m.deleted_at.is_none())
            .map(LastMessage::from_message);
        if let Some(conv) = self
            .conversations
            .iter_mut()
            .find(|c| c.conversation_id == conversation_id)
        {
            conv.last_message = latest;
        }
    }
}

/// 状态管理器
///
/// 依赖全部显式注入（组合根构造并持有），便于在测试中以 mock 网关替换。
pub struct ChatStateManager {
    user_id: String,
    store: Arc<MessageStore>,
    messages_api: Arc<dyn MessageGateway>,
    conversations_api: Arc<dyn ConversationGateway>,
    inner: Mutex<ChatState>,
}

impl ChatStateManager {
    pub fn new(
        user_id: String,
        store: Arc<MessageStore>,
        messages_api: Arc<dyn MessageGateway>,
        conversations_api: Arc<dyn ConversationGateway>,
    ) -> Self {
        Self {
            user_id,
            store,
            messages_api,
            conversations_api,
            inner: Mutex::new(ChatState::default()),
        }
    }

    // ========== 只读快照 ==========

    pub fn conversations(&self) -> Vec<Conversation> {
        self.inner.lock().unwrap().conversations.clone()
    }

    pub fn active_conversation(&self) -> Option<String> {
        self.inner.lock().unwrap().active_conversation.clone()
    }

    /// 当前会话窗口（创建时间升序）
    pub fn messages(&self) -> Vec<Message> {
        self.inner.lock().unwrap().messages.clone()
    }

    pub fn has_more(&self) -> bool {
        self.inner.lock().unwrap().has_more
    }

    pub fn total_unread(&self) -> i32 {
        self.inner
            .lock()
            .unwrap()
            .conversations
            .iter()
            .map(|c| c.unread_count)
            .sum()
    }

    /// 某会话当前正在输入的用户展示名（读取时惰性剔除过期条目）
    pub fn typing_users(&self, conversation_id: &str) -> Vec<String> {
        let mut st = self.inner.lock().unwrap();
        match st.typing.get_mut(conversation_id) {
            Some(entries) => {
                entries.retain(|e| e.since.elapsed() < TYPING_EXPIRE);
                entries.iter().map(|e| e.user_name.clone()).collect()
            }
            None => Vec::new(),
        }
    }

    // ========== 会话窗口切换 ==========

    /// 切换当前查看的会话；`None` 表示离开会话界面。
    /// 切换只停止消费旧会话的窗口更新，不取消任何在途发送。
    pub fn set_active_conversation(&self, conversation_id: Option<String>) {
        let mut st = self.inner.lock().unwrap();
        if st.active_conversation != conversation_id {
            st.active_conversation = conversation_id;
            st.messages.clear();
            st.has_more = false;
        }
    }

    // ========== 发送路径 ==========

    /// 乐观发送
    ///
    /// 成功返回服务器确认后的消息；传输层失败返回仍为 pending 的本地消息
    /// （同时写入离线队列，等待重放）；服务器拒绝时标记 failed 并返回错误。
    pub async fn send_message(
        &self,
        conversation_id: &str,
        msg_type: MessageType,
        content: String,
        attachments: Vec<Attachment>,
        reply_to: Option<String>,
    ) -> Result<Message, ApiError> {
        let temp_id = generate_temp_id(&self.user_id);
        let msg = Message::new_outgoing(
            temp_id.clone(),
            conversation_id.to_string(),
            self.user_id.clone(),
            msg_type,
            content,
            attachments,
            reply_to,
        );

        {
            let mut st = self.inner.lock().unwrap();
            // 只有正在查看的会话才把乐观消息放进窗口
            if st.is_active(conversation_id) {
                st.messages.push(msg.clone());
            }
            st.touch_conversation(&msg, false);
        }
        self.store.save_message(&msg).await;

        let draft = OutgoingMessage {
            temp_id: temp_id.clone(),
            conversation_id: msg.conversation_id.clone(),
            msg_type: msg.msg_type,
            content: msg.content.clone(),
            attachments: msg.attachments.clone(),
            reply_to: msg.reply_to.clone(),
        };

        match self.messages_api.send_message(&draft).await {
            Ok(confirmed) => {
                debug!(
                    "[State] ✅ 发送确认: tempID={} → messageID={}",
                    temp_id, confirmed.message_id
                );
                self.confirm_send(&temp_id, confirmed.clone()).await;
                Ok(confirmed)
            }
            Err(e) if e.is_transport() => {
                info!(
                    "[State] 📮 发送受阻（网络），转入离线队列: tempID={}",
                    temp_id
                );
                self.store
                    .queue_message(&OutboxEntry::from_message(&msg))
                    .await;
                // 保持 pending，连通恢复后由重放器补发
                Ok(msg)
            }
            Err(e) => {
                warn!("[State] ❌ 发送被服务器拒绝: tempID={}, {}", temp_id, e);
                let failed = {
                    let mut st = self.inner.lock().unwrap();
                    st.find_message_mut(&temp_id).map(|m| {
                        m.status = MessageStatus::Failed;
                        m.updated_at = Utc::now().timestamp_millis();
                        m.clone()
                    })
                };
                if let Some(m) = failed {
                    self.store.save_message(&m).await;
                }
                Err(e)
            }
        }
    }

    /// 重试失败 / 滞留的发送：作废旧的离线条目与本地副本，
    /// 以新临时 ID 重新走一遍乐观发送（真正的新尝试）。
    pub async fn retry_message(&self, message_id: &str) -> Result<Message, ApiError> {
        let old = {
            let st = self.inner.lock().unwrap();
            st.messages
                .iter()
                .find(|m| m.message_id == message_id)
                .cloned()
        };
        let old = match old {
            Some(m) => m,
            None => {
                return Err(ApiError::Decode(format!(
                    "重试目标不在当前窗口: {}",
                    message_id
                )))
            }
        };

        self.store.remove_pending_message(message_id).await;
        {
            let mut st = self.inner.lock().unwrap();
            st.messages.retain(|m| m.message_id != message_id);
        }
        self.store.delete_message(message_id).await;

        self.send_message(
            &old.conversation_id,
            old.msg_type,
            old.content,
            old.attachments,
            old.reply_to,
        )
        .await
    }

    /// 服务器确认（发送成功或离线重放成功）：按临时关联整体替换，
    /// 临时 ID 与服务器 ID 绝不同时存在于窗口。
    pub async fn confirm_send(&self, temp_id: &str, mut confirmed: Message) {
        if confirmed.status == MessageStatus::Pending {
            confirmed.status = MessageStatus::Sent;
        }
        {
            let mut st = self.inner.lock().unwrap();
            if let Some(pos) = st.messages.iter().position(|m| m.message_id == temp_id) {
                st.messages[pos] = confirmed.clone();
            } else if let Some(pos) = st
                .messages
                .iter()
                .position(|m| m.message_id == confirmed.message_id)
            {
                // 事件通道可能已先推送服务器副本，LWW 覆盖
                st.messages[pos] = confirmed.clone();
            }
            // 摘要仍指向临时 ID 时换成权威 ID
            if let Some(conv) = st
                .conversations
                .iter_mut()
                .find(|c| c.conversation_id == confirmed.conversation_id)
            {
                if let Some(lm) = &mut conv.last_message {
                    if lm.message_id == temp_id {
                        *lm = LastMessage::from_message(&confirmed);
                    }
                }
            }
        }
        self.store.replace_message(temp_id, &confirmed).await;
    }

    // ========== 入站合并 ==========

    /// 入站消息合并：按 ID 去重，仅当属于当前会话时进入窗口；
    /// 会话摘要与列表顺序无条件刷新，后台会话未读数 +1。
    pub async fn add_message(&self, msg: Message) {
        {
            let mut st = self.inner.lock().unwrap();
            let is_active = st.is_active(&msg.conversation_id);
            if is_active {
                let exists = st.messages.iter().any(|m| m.message_id == msg.message_id);
                if !exists {
                    st.messages.push(msg.clone());
                }
            }
            let bump = !is_active && msg.sender_id != self.user_id;
            st.touch_conversation(&msg, bump);
        }
        self.store.save_message(&msg).await;
    }

    /// 整体替换合并（编辑 / 回应变化）：last-writer-wins，不做字段级合并
    pub async fn update_message(&self, msg: Message) {
        {
            let mut st = self.inner.lock().unwrap();
            if let Some(pos) = st.messages.iter().position(|m| m.message_id == msg.message_id) {
                st.messages[pos] = msg.clone();
            }
            // 摘要指向该消息时同步刷新；软删除则重算
            let summary_hit = st
                .conversations
                .iter()
                .find(|c| c.conversation_id == msg.conversation_id)
                .and_then(|c| c.last_message.as_ref())
                .map(|lm| lm.message_id == msg.message_id)
                .unwrap_or(false);
            if summary_hit {
                if msg.deleted_at.is_some() {
                    st.recompute_summary(&msg.conversation_id);
                } else if let Some(conv) = st
                    .conversations
                    .iter_mut()
                    .find(|c| c.conversation_id == msg.conversation_id)
                {
                    conv.last_message = Some(LastMessage::from_message(&msg));
                }
            }
        }
        self.store.save_message(&msg).await;
    }

    /// 仅覆盖状态字段，且只接受更高的状态（乱序旧事件被丢弃）；
    /// failed 只允许从 pending 进入。
    pub async fn update_message_status(&self, message_id: &str, status: MessageStatus) {
        let updated = {
            let mut st = self.inner.lock().unwrap();
            st.find_message_mut(message_id).and_then(|m| {
                let apply = match status {
                    MessageStatus::Failed => m.status == MessageStatus::Pending,
                    s => s.rank() > m.status.rank(),
                };
                if apply {
                    m.status = status;
                    m.updated_at = Utc::now().timestamp_millis();
                    Some(m.clone())
                } else {
                    debug!(
                        "[State] 丢弃乱序状态事件: messageID={}, {:?} → {:?}",
                        message_id, m.status, status
                    );
                    None
                }
            })
        };
        if let Some(m) = updated {
            self.store.save_message(&m).await;
        }
    }

    /// 批量已读回执：状态转为 read（单调），读者进入 readBy 集合
    pub async fn apply_read_receipt(&self, receipt: &ReadReceipt) {
        let updated = {
            let mut st = self.inner.lock().unwrap();
            let mut changed = Vec::new();
            for id in &receipt.message_ids {
                if let Some(m) = st.find_message_mut(id) {
                    if !m.read_by.contains(&receipt.reader_id) {
                        m.read_by.push(receipt.reader_id.clone());
                    }
                    if MessageStatus::Read.rank() > m.status.rank() {
                        m.status = MessageStatus::Read;
                    }
                    m.updated_at = Utc::now().timestamp_millis();
                    changed.push(m.clone());
                }
            }
            changed
        };
        for m in &updated {
            self.store.save_message(m).await;
        }
    }

    /// 输入状态合并：开始即加入（存在则刷新），停止即移除
    pub fn apply_typing(&self, update: &TypingUpdate) {
        let mut st = self.inner.lock().unwrap();
        let entries = st.typing.entry(update.conversation_id.clone()).or_default();
        if update.is_typing {
            match entries.iter_mut().find(|e| e.user_name == update.user_name) {
                Some(e) => e.since = Instant::now(),
                None => entries.push(TypingEntry {
                    user_name: update.user_name.clone(),
                    since: Instant::now(),
                }),
            }
        } else {
            entries.retain(|e| e.user_name != update.user_name);
        }
    }

    // ========== 网络回写操作 ==========

    /// 编辑消息正文；失败时本地状态保持原样
    pub async fn edit_message(&self, message_id: &str, content: &str) -> Result<(), ApiError> {
        let updated = self.messages_api.update_message(message_id, content).await?;
        self.update_message(updated).await;
        Ok(())
    }

    /// 删除消息：服务器确认后移出窗口并清理本地缓存行；
    /// 失败时不做任何本地改动（非破坏性）。
    pub async fn delete_message(&self, message_id: &str) -> Result<(), ApiError> {
        self.messages_api.delete_message(message_id).await?;
        {
            let mut st = self.inner.lock().unwrap();
            let conv_id = st
                .messages
                .iter()
                .find(|m| m.message_id == message_id)
                .map(|m| m.conversation_id.clone());
            st.messages.retain(|m| m.message_id != message_id);
            if let Some(cid) = conv_id {
                let summary_hit = st
                    .conversations
                    .iter()
                    .find(|c| c.conversation_id == cid)
                    .and_then(|c| c.last_message.as_ref())
                    .map(|lm| lm.message_id == message_id)
                    .unwrap_or(false);
                if summary_hit {
                    st.recompute_summary(&cid);
                }
            }
        }
        self.store.delete_message(message_id).await;
        Ok(())
    }

    /// 回应切换：本地先行切换，失败则回滚
    pub async fn toggle_reaction(&self, message_id: &str, emoji: &str) -> Result<(), ApiError> {
        let added = {
            let mut st = self.inner.lock().unwrap();
            st.find_message_mut(message_id)
                .map(|m| m.toggle_reaction(&self.user_id, emoji))
        };
        let added = match added {
            Some(a) => a,
            None => {
                return Err(ApiError::Decode(format!(
                    "回应目标不在当前窗口: {}",
                    message_id
                )))
            }
        };

        let result = if added {
            self.messages_api.add_reaction(message_id, emoji).await
        } else {
            self.messages_api.remove_reaction(message_id, emoji).await
        };
        match result {
            Ok(updated) => {
                self.update_message(updated).await;
                Ok(())
            }
            Err(e) => {
                let mut st = self.inner.lock().unwrap();
                if let Some(m) = st.find_message_mut(message_id) {
                    m.toggle_reaction(&self.user_id, emoji);
                }
                Err(e)
            }
        }
    }

    // ========== 拉取路径 ==========

    /// 加载消息窗口
    ///
    /// `before` 为空：初始加载，整体替换窗口；网络失败时回退本地缓存
    /// （优先展示缓存数据而不是阻塞错误）。
    /// `before` 有值：向前翻页，去重后前插，已持有的消息集合只增不减。
    pub async fn load_messages(
        &self,
        conversation_id: &str,
        before: Option<String>,
    ) -> Result<(), ApiError> {
        match before {
            None => {
                match self
                    .messages_api
                    .list_messages(conversation_id, None, MESSAGE_PAGE_SIZE)
                    .await
                {
                    Ok(mut page) => {
                        let has_more = page.len() as u32 >= MESSAGE_PAGE_SIZE;
                        page.sort_by_key(|m| m.created_at);
                        {
                            let mut st = self.inner.lock().unwrap();
                            st.active_conversation = Some(conversation_id.to_string());
                            st.messages = page.clone();
                            st.has_more = has_more;
                        }
                        for m in &page {
                            self.store.save_message(m).await;
                        }
                        Ok(())
                    }
                    Err(e) if e.is_transport() => {
                        warn!(
                            "[State] 初始加载网络失败，回退本地缓存: conversationID={}, {}",
                            conversation_id, e
                        );
                        let mut cached =
                            self.store.get_messages(conversation_id, MESSAGE_PAGE_SIZE).await;
                        cached.sort_by_key(|m| m.created_at);
                        let mut st = self.inner.lock().unwrap();
                        st.active_conversation = Some(conversation_id.to_string());
                        st.messages = cached;
                        st.has_more = false;
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            Some(cursor) => {
                // 翻页失败直接上抛，现有窗口保持不变
                let mut page = self
                    .messages_api
                    .list_messages(conversation_id, Some(&cursor), MESSAGE_PAGE_SIZE)
                    .await?;
                let has_more = page.len() as u32 >= MESSAGE_PAGE_SIZE;
                page.sort_by_key(|m| m.created_at);
                let mut st = self.inner.lock().unwrap();
                if !st.is_active(conversation_id) {
                    return Ok(());
                }
                let mut merged: Vec<Message> = page
                    .into_iter()
                    .filter(|m| {
                        !st.messages
                            .iter()
                            .any(|e| e.message_id == m.message_id)
                    })
                    .collect();
                merged.append(&mut st.messages);
                st.messages = merged;
                st.has_more = has_more;
                Ok(())
            }
        }
    }

    /// 刷新会话列表：offset=0 整体替换（下拉刷新），否则追加（无限滚动）
    pub async fn refresh_conversations(&self, offset: u32) -> Result<(), ApiError> {
        let page = self
            .conversations_api
            .list_conversations(offset, CONVERSATION_PAGE_SIZE)
            .await?;
        let mut st = self.inner.lock().unwrap();
        if offset == 0 {
            st.conversations = page;
        } else {
            for conv in page {
                if !st
                    .conversations
                    .iter()
                    .any(|c| c.conversation_id == conv.conversation_id)
                {
                    st.conversations.push(conv);
                }
            }
        }
        Ok(())
    }

    /// 消息检索：优先服务器，网络失败回退本地缓存
    pub async fn search_messages(&self, conversation_id: &str, keyword: &str) -> Vec<Message> {
        match self
            .messages_api
            .search_messages(conversation_id, keyword)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!("[State] 服务器检索失败，回退本地: {}", e);
                self.store.search_messages(conversation_id, keyword).await
            }
        }
    }

    /// 标记整个会话已读：上报服务器、清零未读数、窗口内消息转为已读。
    /// 返回被标记的消息 ID（调用方据此发 `read_messages` 控制帧）。
    pub async fn mark_conversation_read(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<String>, ApiError> {
        let ids: Vec<String> = {
            let st = self.inner.lock().unwrap();
            st.messages
                .iter()
                .filter(|m| {
                    m.conversation_id == conversation_id
                        && m.sender_id != self.user_id
                        && m.status != MessageStatus::Failed
                        && m.status.rank() < MessageStatus::Read.rank()
                })
                .map(|m| m.message_id.clone())
                .collect()
        };
        if !ids.is_empty() {
            self.messages_api.mark_read(conversation_id, &ids).await?;
        }
        let updated = {
            let mut st = self.inner.lock().unwrap();
            if let Some(conv) = st
                .conversations
                .iter_mut()
                .find(|c| c.conversation_id == conversation_id)
            {
                conv.unread_count = 0;
            }
            let user_id = self.user_id.clone();
            let mut changed = Vec::new();
            for m in st
                .messages
                .iter_mut()
                .filter(|m| ids.contains(&m.message_id))
            {
                m.status = MessageStatus::Read;
                if !m.read_by.contains(&user_id) {
                    m.read_by.push(user_id.clone());
                }
                changed.push(m.clone());
            }
            changed
        };
        for m in &updated {
            self.store.save_message(m).await;
        }
        Ok(ids)
    }

    pub async fn set_conversation_pinned(
        &self,
        conversation_id: &str,
        pinned: bool,
    ) -> Result<(), ApiError> {
        self.conversations_api
            .set_pinned(conversation_id, pinned)
            .await?;
        let mut st = self.inner.lock().unwrap();
        if let Some(conv) = st
            .conversations
            .iter_mut()
            .find(|c| c.conversation_id == conversation_id)
        {
            conv.is_pinned = pinned;
        }
        Ok(())
    }

    /// 创建会话：服务器确认后插入列表首位
    pub async fn create_conversation(
        &self,
        member_ids: &[String],
        title: Option<&str>,
    ) -> Result<Conversation, ApiError> {
        let conv = self
            .conversations_api
            .create_conversation(member_ids, title)
            .await?;
        let mut st = self.inner.lock().unwrap();
        if !st
            .conversations
            .iter()
            .any(|c| c.conversation_id == conv.conversation_id)
        {
            st.conversations.insert(0, conv.clone());
        }
        Ok(conv)
    }

    /// 更新会话资料：服务器确认后按 LWW 合入列表（保留本地未读数等视角字段）
    pub async fn update_conversation_profile(
        &self,
        conversation_id: &str,
        title: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<(), ApiError> {
        let updated = self
            .conversations_api
            .update_conversation(conversation_id, title, avatar_url)
            .await?;
        let mut st = self.inner.lock().unwrap();
        if let Some(conv) = st
            .conversations
            .iter_mut()
            .find(|c| c.conversation_id == conversation_id)
        {
            conv.title = updated.title;
            conv.avatar_url = updated.avatar_url;
            conv.member_ids = updated.member_ids;
            conv.admin_ids = updated.admin_ids;
            conv.updated_at = updated.updated_at.max(conv.updated_at);
        }
        Ok(())
    }

    pub async fn set_conversation_muted(
        &self,
        conversation_id: &str,
        muted_until: i64,
    ) -> Result<(), ApiError> {
        self.conversations_api
            .set_muted_until(conversation_id, muted_until)
            .await?;
        let mut st = self.inner.lock().unwrap();
        if let Some(conv) = st
            .conversations
            .iter_mut()
            .find(|c| c.conversation_id == conversation_id)
        {
            conv.muted_until = muted_until;
        }
        Ok(())
    }
}
