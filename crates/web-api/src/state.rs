use std::sync::Arc;

use application::{
    ChatCoordinator, ChatCoordinatorDependencies, CoordinatorSettings, SubscriptionHub,
    SystemClock,
};
use config::{AppConfig, StorageBackend};
use infrastructure::{Infrastructure, JwtAuthenticator};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ChatCoordinator>,
    /// 在线连接的订阅登记处，也是协调器使用的广播器
    pub hub: Arc<SubscriptionHub>,
    pub jwt: Arc<JwtAuthenticator>,
    /// 是否开放开发用的令牌签发接口（仅内存后端）
    pub dev_tokens: bool,
}

impl AppState {
    pub fn new(
        coordinator: Arc<ChatCoordinator>,
        hub: Arc<SubscriptionHub>,
        jwt: Arc<JwtAuthenticator>,
    ) -> Self {
        Self {
            coordinator,
            hub,
            jwt,
            dev_tokens: false,
        }
    }

    /// 按配置组装订阅中心与协调器
    pub fn build(config: &AppConfig, infrastructure: &Infrastructure) -> Self {
        let hub = Arc::new(SubscriptionHub::new(config.hub.subscriber_queue_capacity));
        let coordinator = Arc::new(ChatCoordinator::new(ChatCoordinatorDependencies {
            rooms: infrastructure.rooms.clone(),
            messages: infrastructure.messages.clone(),
            broadcaster: hub.clone(),
            authenticator: infrastructure.authenticator(),
            clock: Arc::new(SystemClock),
            settings: CoordinatorSettings::from(config),
        }));

        Self::new(coordinator, hub, infrastructure.jwt.clone())
            .with_dev_tokens(infrastructure.backend == StorageBackend::Memory)
    }

    pub fn with_dev_tokens(mut self, enabled: bool) -> Self {
        self.dev_tokens = enabled;
        self
    }
}
