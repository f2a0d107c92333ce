mod chat_coordinator;


pub use chat_coordinator::{
    ChatCoordinator, ChatCoordinatorDependencies, CoordinatorSettings, SendMessageRequest,
    SendReceipt,
};
