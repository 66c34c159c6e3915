//! 连通性监视器
//!
//! 观察平台上报的可达性信号：未知（None）按不可达处理，
//! 每次 不可达 → 可达 的跃迁恰好触发一轮离线队列重放。

use crate::im::outbox::OutboxReconciler;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// 连通性监视器
pub struct ConnectivityMonitor {
    reconciler: Arc<OutboxReconciler>,
    /// 上次观察到的可达性；启动时未知
    reachable: Mutex<Option<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(reconciler: Arc<OutboxReconciler>) -> Self {
        Self {
            reconciler,
            reachable: Mutex::new(None),
        }
    }

    /// 当前是否可达（未知视为不可达）
    pub async fn is_reachable(&self) -> bool {
        self.reachable.lock().await.unwrap_or(false)
    }

    /// 喂入一次可达性观测。返回本次是否触发了重放。
    pub async fn update_reachability(&self, reachable: Option<bool>) -> bool {
        let transition = {
            let mut current = self.reachable.lock().await;
            // None 不算可达：未知状态绝不触发重放
            let was = current.unwrap_or(false);
            let now = reachable.unwrap_or(false);
            *current = reachable;
            !was && now
        };
        if transition {
            info!("[Connectivity] 📶 连通恢复，触发离线队列重放");
            self.reconciler.drain().await;
        } else {
            debug!("[Connectivity] 可达性观测: {:?}（无跃迁）", reachable);
        }
        transition
    }
}
