use std::{future::Future, sync::Arc, time::Duration};

use config::AppConfig;
use domain::{
    Channel, Destination, Identity, IdentityContext, Message, MessageBody, NewMessage,
    RepositoryError, Room, RoomId, RoomKind, RoomName, RoomSummary, Sequence, UserId,
};
use uuid::Uuid;

use crate::{
    authenticator::{AuthError, Authenticator},
    broadcaster::{DeliveryReport, MessageBroadcast, MessageBroadcaster},
    clock::Clock,
    error::ApplicationError,
    repository::{HistoryQuery, MessagePage, MessageStore, RoomRegistry},
};

/// 协调器的运行参数
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// 单次存储调用的上限，超时视为存储不可用
    pub storage_timeout: Duration,
    pub auth_timeout: Duration,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            storage_timeout: Duration::from_secs(3),
            auth_timeout: Duration::from_secs(1),
            default_page_size: 50,
            max_page_size: 200,
        }
    }
}

impl From<&AppConfig> for CoordinatorSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            storage_timeout: config.storage.timeout(),
            auth_timeout: config.auth.timeout(),
            default_page_size: config.history.default_page_size,
            max_page_size: config.history.max_page_size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub destination: Destination,
    pub body: String,
    /// 客户端生成的幂等键，重试时保持不变
    pub client_message_id: Option<Uuid>,
}

/// 发送回执：已持久化的消息就是持久性确认，投递统计只供参考
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message: Message,
    pub delivery: DeliveryReport,
    /// 命中幂等键，消息此前已持久化，本次没有再次广播
    pub duplicate: bool,
}

pub struct ChatCoordinatorDependencies {
    pub rooms: Arc<dyn RoomRegistry>,
    pub messages: Arc<dyn MessageStore>,
    pub broadcaster: Arc<dyn MessageBroadcaster>,
    pub authenticator: Arc<dyn Authenticator>,
    pub clock: Arc<dyn Clock>,
    pub settings: CoordinatorSettings,
}

/// 聊天协调器
///
/// 发送流程：校验身份 → 解析或创建目标房间 → 追加到消息存储 → 向订阅中心发布。
/// 追加之前的任何失败都以错误返回，此时消息既未持久化也未投递；
/// 追加成功之后的投递问题只记录日志。
pub struct ChatCoordinator {
    deps: ChatCoordinatorDependencies,
}

/// 已解析的发送目标
struct ResolvedTarget {
    room: Room,
    receiver_id: Option<UserId>,
    channel: Channel,
}

impl ChatCoordinator {
    pub fn new(deps: ChatCoordinatorDependencies) -> Self {
        Self { deps }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.deps.settings
    }

    /// 把 bearer 凭证换成请求上下文；缺失、无效、过期或认证超时都视为未授权
    pub async fn authenticate(
        &self,
        credential: Option<&str>,
    ) -> Result<IdentityContext, ApplicationError> {
        let credential = credential
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(AuthError::Unauthenticated)?;

        let outcome = tokio::time::timeout(
            self.deps.settings.auth_timeout,
            self.deps.authenticator.authenticate(credential),
        )
        .await;

        match outcome {
            Ok(Ok(identity)) => Ok(IdentityContext::authenticated(identity)),
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "凭证校验失败");
                Err(err.into())
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.deps.settings.auth_timeout.as_millis() as u64,
                    "认证器调用超时"
                );
                Err(ApplicationError::unauthorized("authenticator timed out"))
            }
        }
    }

    pub async fn send_message(
        &self,
        ctx: &IdentityContext,
        request: SendMessageRequest,
    ) -> Result<SendReceipt, ApplicationError> {
        let sender = ctx.require()?;
        let body = MessageBody::new(request.body)?;
        let target = self.resolve_target(sender, &request.destination).await?;

        let outcome = self
            .bounded(
                "append",
                self.deps.messages.append(NewMessage {
                    room_id: target.room.id,
                    sender_id: sender.id,
                    receiver_id: target.receiver_id,
                    body,
                    sent_at: self.deps.clock.now(),
                    client_message_id: request.client_message_id,
                }),
            )
            .await?;

        let message = outcome.message;
        if !outcome.created {
            tracing::info!(
                room_id = %message.room_id,
                sequence = message.id.value(),
                sender_id = %sender.id,
                "重复的 client_message_id，返回已持久化的消息"
            );
            return Ok(SendReceipt {
                message,
                delivery: DeliveryReport::default(),
                duplicate: true,
            });
        }

        // 消息已持久化，之后的失败都不能让发送失败
        if let Err(err) = self
            .bounded(
                "record_activity",
                self.deps
                    .rooms
                    .record_activity(message.room_id, message.id, message.sent_at),
            )
            .await
        {
            tracing::warn!(room_id = %message.room_id, error = %err, "更新房间活动时间失败");
        }

        let delivery = match self
            .deps
            .broadcaster
            .broadcast(MessageBroadcast {
                channel: target.channel,
                message: message.clone(),
            })
            .await
        {
            Ok(report) => report,
            Err(err) => {
                tracing::error!(
                    room_id = %message.room_id,
                    sequence = message.id.value(),
                    error = %err,
                    "消息已持久化，但广播失败"
                );
                DeliveryReport::default()
            }
        };

        tracing::info!(
            room_id = %message.room_id,
            sequence = message.id.value(),
            sender_id = %sender.id,
            channel = %target.channel,
            delivered = delivery.delivered,
            missed = delivery.missed,
            "消息已发送"
        );

        Ok(SendReceipt {
            message,
            delivery,
            duplicate: false,
        })
    }

    /// 房间的全部历史，按序列号从旧到新
    pub async fn get_all_messages(
        &self,
        ctx: &IdentityContext,
        room_name: &str,
    ) -> Result<Vec<Message>, ApplicationError> {
        let identity = ctx.require()?;
        let room = self.readable_room(identity, room_name).await?;
        self.bounded("list_all", self.deps.messages.list_all(room.id))
            .await
    }

    /// 游标分页的历史查询，`limit` 缺省取默认页大小并限制在最大页大小以内
    pub async fn list_messages(
        &self,
        ctx: &IdentityContext,
        room_name: &str,
        after: Option<Sequence>,
        limit: Option<u32>,
    ) -> Result<MessagePage, ApplicationError> {
        let identity = ctx.require()?;
        let room = self.readable_room(identity, room_name).await?;
        let settings = &self.deps.settings;
        let limit = limit
            .unwrap_or(settings.default_page_size)
            .clamp(1, settings.max_page_size);

        self.bounded(
            "list_messages",
            self.deps
                .messages
                .list_messages(room.id, HistoryQuery { after, limit }),
        )
        .await
    }

    /// 某个用户所在的房间；只有本人或管理员可以查询
    pub async fn get_all_rooms(
        &self,
        ctx: &IdentityContext,
        user_id: UserId,
    ) -> Result<Vec<RoomSummary>, ApplicationError> {
        let identity = ctx.require()?;
        if !identity.can_act_for(user_id) {
            return Err(ApplicationError::unauthorized(
                "cannot list rooms of another user",
            ));
        }
        self.bounded("list_rooms_for", self.deps.rooms.list_rooms_for(user_id))
            .await
    }

    pub async fn create_room(
        &self,
        ctx: &IdentityContext,
        name: &str,
    ) -> Result<Room, ApplicationError> {
        let identity = ctx.require()?;
        let name = RoomName::parse_group(name)?;

        let mut room = Room::new_group(
            RoomId::from(Uuid::new_v4()),
            name.clone(),
            self.deps.clock.now(),
        );
        room.add_member(identity.id);

        let room = self
            .bounded("create_room", self.deps.rooms.create_room(room))
            .await
            .map_err(|err| match err {
                ApplicationError::Conflict(_) => {
                    ApplicationError::Conflict(format!("room `{name}` already exists"))
                }
                other => other,
            })?;

        tracing::info!(room_id = %room.id, room_name = %room.name, creator = %identity.id, "房间已创建");
        Ok(room)
    }

    pub async fn join_room(
        &self,
        ctx: &IdentityContext,
        room_name: &str,
    ) -> Result<Room, ApplicationError> {
        let identity = ctx.require()?;
        let mut room = self.find_room(room_name).await?;
        if room.kind == RoomKind::Direct && !room.is_member(identity.id) {
            return Err(ApplicationError::unauthorized(
                "direct rooms cannot be joined",
            ));
        }

        let added = self
            .bounded(
                "ensure_membership",
                self.deps.rooms.ensure_membership(room.id, identity.id),
            )
            .await?;
        room.add_member(identity.id);
        if added {
            tracing::info!(room_id = %room.id, user_id = %identity.id, "用户加入房间");
        }
        Ok(room)
    }

    /// 显式退出房间，返回是否确实退出；重复调用是无操作
    pub async fn leave_room(
        &self,
        ctx: &IdentityContext,
        room_name: &str,
    ) -> Result<bool, ApplicationError> {
        let identity = ctx.require()?;
        let room = self.find_room(room_name).await?;
        if room.kind == RoomKind::Direct {
            return Err(domain::DomainError::invalid_argument(
                "room_name",
                "direct rooms cannot be left",
            )
            .into());
        }

        let removed = self
            .bounded(
                "remove_membership",
                self.deps.rooms.remove_membership(room.id, identity.id),
            )
            .await?;
        if removed {
            tracing::info!(room_id = %room.id, user_id = %identity.id, "用户退出房间");
        }
        Ok(removed)
    }

    /// 订阅前的授权：房间必须存在（直连房间只对成员开放），用户通道只能订阅自己的
    pub async fn resolve_channel(
        &self,
        ctx: &IdentityContext,
        destination: &Destination,
    ) -> Result<Channel, ApplicationError> {
        let identity = ctx.require()?;
        match destination {
            Destination::Room(name) => {
                let room = self.readable_room(identity, name.as_str()).await?;
                Ok(Channel::Room(room.id))
            }
            Destination::User(user_id) if *user_id == identity.id => Ok(Channel::User(*user_id)),
            Destination::User(_) => Err(ApplicationError::unauthorized(
                "cannot subscribe to another user's channel",
            )),
        }
    }

    async fn resolve_target(
        &self,
        sender: &Identity,
        destination: &Destination,
    ) -> Result<ResolvedTarget, ApplicationError> {
        match destination {
            Destination::Room(name) => {
                let room = self.find_room(name.as_str()).await?;
                match room.kind {
                    RoomKind::Direct if !room.is_member(sender.id) => {
                        Err(ApplicationError::unauthorized(
                            "not a participant of this direct room",
                        ))
                    }
                    // 按房间名发往直连房间时与按用户ID发送走同一路由
                    RoomKind::Direct => {
                        let receiver_id = room
                            .members
                            .iter()
                            .copied()
                            .find(|member| *member != sender.id)
                            .unwrap_or(sender.id);
                        Ok(ResolvedTarget {
                            room,
                            receiver_id: Some(receiver_id),
                            channel: Channel::User(receiver_id),
                        })
                    }
                    RoomKind::Group => {
                        self.bounded(
                            "ensure_membership",
                            self.deps.rooms.ensure_membership(room.id, sender.id),
                        )
                        .await?;
                        Ok(ResolvedTarget {
                            channel: Channel::Room(room.id),
                            receiver_id: None,
                            room,
                        })
                    }
                }
            }
            Destination::User(receiver_id) => {
                let candidate = Room::new_direct(
                    RoomId::from(Uuid::new_v4()),
                    sender.id,
                    *receiver_id,
                    self.deps.clock.now(),
                );
                let room = self
                    .bounded(
                        "get_or_create_direct",
                        self.deps.rooms.get_or_create_direct(candidate),
                    )
                    .await?;
                Ok(ResolvedTarget {
                    room,
                    receiver_id: Some(*receiver_id),
                    channel: Channel::User(*receiver_id),
                })
            }
        }
    }

    async fn find_room(&self, room_name: &str) -> Result<Room, ApplicationError> {
        let name = RoomName::parse(room_name)?;
        self.bounded("find_by_name", self.deps.rooms.find_by_name(&name))
            .await?
            .ok_or_else(|| ApplicationError::not_found(format!("room `{name}` not found")))
    }

    /// 直连房间的历史只对参与者和管理员可见
    async fn readable_room(
        &self,
        identity: &Identity,
        room_name: &str,
    ) -> Result<Room, ApplicationError> {
        let room = self.find_room(room_name).await?;
        if room.kind == RoomKind::Direct
            && !room.is_member(identity.id)
            && !identity.role.is_admin()
        {
            return Err(ApplicationError::unauthorized(
                "not a participant of this direct room",
            ));
        }
        Ok(room)
    }

    /// 给存储调用加上超时，超时与存储错误都映射为应用层错误
    async fn bounded<T, F>(&self, operation: &'static str, future: F) -> Result<T, ApplicationError>
    where
        F: Future<Output = Result<T, RepositoryError>>,
    {
        let timeout = self.deps.settings.storage_timeout;
        match tokio::time::timeout(timeout, future).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                if matches!(err, RepositoryError::Storage { .. }) {
                    tracing::warn!(operation, error = %err, "存储调用失败");
                }
                Err(err.into())
            }
            Err(_) => {
                tracing::warn!(
                    operation,
                    timeout_ms = timeout.as_millis() as u64,
                    "存储调用超时"
                );
                Err(ApplicationError::storage_unavailable(format!(
                    "{operation} timed out"
                )))
            }
        }
    }
}
