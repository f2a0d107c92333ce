use async_trait::async_trait;
use domain::{Channel, Message};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageBroadcast {
    pub channel: Channel,
    pub message: Message,
}

/// 一次发布的投递统计，仅供观测，不代表持久化结果
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryReport {
    /// 成功放入订阅者队列的数量
    pub delivered: usize,
    /// 因队列已满或连接已关闭而错过的数量
    pub missed: usize,
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast failed: {0}")]
    Failed(String),
}

impl BroadcastError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[async_trait]
pub trait MessageBroadcaster: Send + Sync {
    async fn broadcast(&self, payload: MessageBroadcast) -> Result<DeliveryReport, BroadcastError>;
}
