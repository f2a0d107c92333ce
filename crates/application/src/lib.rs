//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：发送消息的编排、房间与历史查询，
//! 以及对外部适配器（认证器、消息存储、房间注册表、消息广播）的抽象。

pub mod authenticator;
pub mod broadcaster;
pub mod clock;
pub mod dto;
pub mod error;
pub mod hub;
pub mod memory;
pub mod repository;
pub mod services;

pub use authenticator::{AuthError, Authenticator};
pub use broadcaster::{BroadcastError, DeliveryReport, MessageBroadcast, MessageBroadcaster};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dto::{MessageDto, MessagePageDto, RoomDto, RoomSummaryDto, SendReceiptDto};
pub use error::ApplicationError;
pub use hub::{Subscription, SubscriptionHandle, SubscriptionHub};
pub use memory::{InMemoryMessageStore, InMemoryRoomRegistry};
pub use repository::{AppendOutcome, HistoryQuery, MessagePage, MessageStore, RoomRegistry};
pub use services::{
    ChatCoordinator, ChatCoordinatorDependencies, CoordinatorSettings, SendMessageRequest,
    SendReceipt,
};
