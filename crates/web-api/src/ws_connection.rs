use std::collections::HashMap;

use application::{
    ApplicationError, MessageDto, SendMessageRequest, SendReceiptDto, SubscriptionHandle,
};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{Destination, IdentityContext, UserId};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use crate::state::AppState;

/// 单个连接的出站命令队列容量
const OUTBOUND_CAPACITY: usize = 32;

/// 客户端发送的帧，按 `type` 字段区分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe {
        destination: Destination,
    },
    Unsubscribe {
        subscription: u64,
    },
    Send {
        destination: Destination,
        body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_message_id: Option<Uuid>,
    },
    Ping,
}

/// 服务端推送的帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Subscribed {
        subscription: u64,
        destination: Destination,
    },
    Unsubscribed {
        subscription: u64,
    },
    Message {
        subscription: u64,
        message: MessageDto,
    },
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_message_id: Option<Uuid>,
        receipt: SendReceiptDto,
    },
    Error {
        code: String,
        message: String,
    },
    Pong,
}

impl ServerFrame {
    fn error(code: &str, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<ApplicationError> for ServerFrame {
    fn from(err: ApplicationError) -> Self {
        ServerFrame::error(err.code(), err.to_string())
    }
}

/// WebSocket 发送命令
enum WsCommand {
    SendText(String),
    SendPong(Vec<u8>),
}

/// 连接已结束，主循环应退出
struct ConnectionClosed;

struct ActiveSubscription {
    handle: SubscriptionHandle,
    forwarder: JoinHandle<()>,
}

/// WebSocket 会话
///
/// 一个会话属于一个已认证的身份，可以同时持有多个订阅。
/// 建立时自动订阅自己的用户通道，断开时释放全部订阅。
pub struct WebSocketConnection {
    state: AppState,
    ctx: IdentityContext,
    user_id: UserId,
    subscriptions: HashMap<u64, ActiveSubscription>,
}

impl WebSocketConnection {
    pub fn new(state: AppState, ctx: IdentityContext, user_id: UserId) -> Self {
        tracing::info!(user_id = %user_id, "WebSocket 连接已建立");
        Self {
            state,
            ctx,
            user_id,
            subscriptions: HashMap::new(),
        }
    }

    /// 运行连接主循环，直到客户端断开或发送任务结束
    pub async fn run(mut self, socket: WebSocket) {
        let (mut sender, mut incoming) = socket.split();

        // 创建 mpsc channel 来解耦对 sender 的访问
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(OUTBOUND_CAPACITY);

        // 发送任务：统一处理所有对 WebSocket sender 的写操作
        let mut send_task = tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                let frame = match cmd {
                    WsCommand::SendText(text) => WsMessage::Text(text.into()),
                    WsCommand::SendPong(data) => WsMessage::Pong(data.into()),
                };
                if sender.send(frame).await.is_err() {
                    tracing::warn!("WebSocket 写入失败");
                    break;
                }
            }
            tracing::debug!("WebSocket发送任务结束");
        });

        let own_channel = Destination::User(self.user_id);
        if self.subscribe(own_channel, &cmd_tx).await.is_ok() {
            loop {
                tokio::select! {
                    _ = &mut send_task => {
                        tracing::debug!("WebSocket发送任务完成");
                        break;
                    }
                    incoming_message = incoming.next() => {
                        let Some(Ok(message)) = incoming_message else {
                            break;
                        };
                        if self.handle_incoming(message, &cmd_tx).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        self.release_all().await;
        send_task.abort();
        tracing::info!(user_id = %self.user_id, "WebSocket 连接已关闭");
    }

    async fn handle_incoming(
        &mut self,
        message: WsMessage,
        cmd_tx: &mpsc::Sender<WsCommand>,
    ) -> Result<(), ConnectionClosed> {
        match message {
            WsMessage::Text(text) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
                Ok(frame) => self.handle_frame(frame, cmd_tx).await,
                Err(err) => {
                    tracing::debug!(error = %err, "无法解析的客户端帧");
                    send_frame(cmd_tx, &ServerFrame::error("BAD_FRAME", err.to_string())).await
                }
            },
            WsMessage::Ping(data) => cmd_tx
                .send(WsCommand::SendPong(data.to_vec()))
                .await
                .map_err(|_| ConnectionClosed),
            WsMessage::Close(_) => Err(ConnectionClosed),
            _ => Ok(()),
        }
    }

    async fn handle_frame(
        &mut self,
        frame: ClientFrame,
        cmd_tx: &mpsc::Sender<WsCommand>,
    ) -> Result<(), ConnectionClosed> {
        match frame {
            ClientFrame::Subscribe { destination } => self.subscribe(destination, cmd_tx).await,
            ClientFrame::Unsubscribe { subscription } => {
                self.unsubscribe(subscription).await;
                send_frame(cmd_tx, &ServerFrame::Unsubscribed { subscription }).await
            }
            ClientFrame::Send {
                destination,
                body,
                client_message_id,
            } => {
                let request = SendMessageRequest {
                    destination,
                    body,
                    client_message_id,
                };
                let reply = match self.state.coordinator.send_message(&self.ctx, request).await {
                    Ok(receipt) => ServerFrame::Ack {
                        client_message_id,
                        receipt: SendReceiptDto::from(&receipt),
                    },
                    Err(err) => ServerFrame::from(err),
                };
                send_frame(cmd_tx, &reply).await
            }
            ClientFrame::Ping => send_frame(cmd_tx, &ServerFrame::Pong).await,
        }
    }

    /// 授权后登记订阅，并启动把投递转成 `message` 帧的转发任务
    async fn subscribe(
        &mut self,
        destination: Destination,
        cmd_tx: &mpsc::Sender<WsCommand>,
    ) -> Result<(), ConnectionClosed> {
        let channel = match self
            .state
            .coordinator
            .resolve_channel(&self.ctx, &destination)
            .await
        {
            Ok(channel) => channel,
            Err(err) => return send_frame(cmd_tx, &ServerFrame::from(err)).await,
        };

        let subscription = self.state.hub.subscribe(self.user_id, channel).await;
        let handle = subscription.handle;
        let id = handle.id;
        let mut receiver = subscription.receiver;
        let outbound = cmd_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(broadcast) = receiver.recv().await {
                let frame = ServerFrame::Message {
                    subscription: id,
                    message: MessageDto::from(&broadcast.message),
                };
                if send_frame(&outbound, &frame).await.is_err() {
                    break;
                }
            }
        });
        self.subscriptions
            .insert(id, ActiveSubscription { handle, forwarder });

        tracing::debug!(user_id = %self.user_id, %channel, subscription = id, "订阅已建立");
        send_frame(
            cmd_tx,
            &ServerFrame::Subscribed {
                subscription: id,
                destination,
            },
        )
        .await
    }

    /// 未知的订阅号视为已取消
    async fn unsubscribe(&mut self, id: u64) {
        if let Some(active) = self.subscriptions.remove(&id) {
            self.state.hub.unsubscribe(&active.handle).await;
            active.forwarder.abort();
        }
    }

    async fn release_all(&mut self) {
        for (_, active) in self.subscriptions.drain() {
            self.state.hub.unsubscribe(&active.handle).await;
            active.forwarder.abort();
        }
    }
}

async fn send_frame(
    cmd_tx: &mpsc::Sender<WsCommand>,
    frame: &ServerFrame,
) -> Result<(), ConnectionClosed> {
    let payload = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(err) => {
            tracing::warn!(error = %err, "failed to serialize websocket payload");
            return Ok(());
        }
    };
    cmd_tx
        .send(WsCommand::SendText(payload))
        .await
        .map_err(|_| ConnectionClosed)
}
