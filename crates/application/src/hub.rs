//! 订阅中心
//!
//! 维护每个通道（房间 / 用户）的在线订阅者，并把发布的消息扇出到各自的有界队列。
//! 发布方只做非阻塞的 `try_send`：慢订阅者队列满时丢弃该条并记录，
//! 不会拖慢整个房间的扇出。

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use domain::{Channel, UserId};
use tokio::sync::{mpsc, RwLock};

use crate::broadcaster::{BroadcastError, DeliveryReport, MessageBroadcast, MessageBroadcaster};

pub type SubscriptionId = u64;

/// 订阅句柄，可以重复取消
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub identity_id: UserId,
    pub channel: Channel,
}

/// 一次订阅：句柄加上连接持有的接收端
#[derive(Debug)]
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub receiver: mpsc::Receiver<Arc<MessageBroadcast>>,
}

/// 订阅者条目只持有发送端，连接本身由接收端所在的任务拥有
struct Subscriber {
    identity_id: UserId,
    sender: mpsc::Sender<Arc<MessageBroadcast>>,
}

pub struct SubscriptionHub {
    channels: RwLock<HashMap<Channel, HashMap<SubscriptionId, Subscriber>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl SubscriptionHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// 为一个在线连接注册对某通道的兴趣；同一身份可以有多个订阅（多设备）
    pub async fn subscribe(&self, identity_id: UserId, channel: Channel) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.queue_capacity);

        self.channels
            .write()
            .await
            .entry(channel)
            .or_default()
            .insert(
                id,
                Subscriber {
                    identity_id,
                    sender,
                },
            );

        tracing::debug!(subscription_id = id, identity_id = %identity_id, channel = %channel, "订阅已注册");

        Subscription {
            handle: SubscriptionHandle {
                id,
                identity_id,
                channel,
            },
            receiver,
        }
    }

    /// 取消订阅；已经取消的句柄再次调用是无操作，返回 false
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut channels = self.channels.write().await;
        let Some(subscribers) = channels.get_mut(&handle.channel) else {
            return false;
        };
        let removed = subscribers.remove(&handle.id).is_some();
        if subscribers.is_empty() {
            channels.remove(&handle.channel);
        }
        if removed {
            tracing::debug!(subscription_id = handle.id, channel = %handle.channel, "订阅已取消");
        }
        removed
    }

    /// 向通道当前的全部订阅者投递。
    ///
    /// 各订阅者相互独立：某个订阅者失败不影响其他订阅者，也不会让发布失败。
    pub async fn publish(&self, payload: MessageBroadcast) -> DeliveryReport {
        let channel = payload.channel;
        let payload = Arc::new(payload);
        let mut report = DeliveryReport::default();
        let mut closed = Vec::new();

        {
            let channels = self.channels.read().await;
            let Some(subscribers) = channels.get(&channel) else {
                return report;
            };

            for (id, subscriber) in subscribers {
                match subscriber.sender.try_send(payload.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        report.missed += 1;
                        tracing::warn!(
                            subscription_id = id,
                            identity_id = %subscriber.identity_id,
                            channel = %channel,
                            sequence = %payload.message.id,
                            "订阅者队列已满，本条消息尽力投递失败"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        report.missed += 1;
                        closed.push(*id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            self.prune(channel, &closed).await;
        }

        report
    }

    pub async fn subscriber_count(&self, channel: Channel) -> usize {
        self.channels
            .read()
            .await
            .get(&channel)
            .map_or(0, HashMap::len)
    }

    pub async fn is_subscribed(&self, handle: &SubscriptionHandle) -> bool {
        self.channels
            .read()
            .await
            .get(&handle.channel)
            .is_some_and(|subscribers| subscribers.contains_key(&handle.id))
    }

    /// 清理连接已关闭但未显式取消的订阅，避免泄漏
    async fn prune(&self, channel: Channel, ids: &[SubscriptionId]) {
        let mut channels = self.channels.write().await;
        if let Some(subscribers) = channels.get_mut(&channel) {
            for id in ids {
                if subscribers.remove(id).is_some() {
                    tracing::debug!(subscription_id = id, channel = %channel, "清理已关闭的订阅");
                }
            }
            if subscribers.is_empty() {
                channels.remove(&channel);
            }
        }
    }
}

#[async_trait]
impl MessageBroadcaster for SubscriptionHub {
    async fn broadcast(&self, payload: MessageBroadcast) -> Result<DeliveryReport, BroadcastError> {
        Ok(self.publish(payload).await)
    }
}
