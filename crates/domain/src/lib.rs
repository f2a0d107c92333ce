//! 聊天系统核心领域模型
//!
//! 包含身份、房间、消息、投递目标等核心类型，以及相关的校验规则。

pub mod destination;
pub mod entities;
pub mod errors;
pub mod identity;
pub mod value_objects;

// 重新导出常用类型
pub use destination::*;
pub use entities::*;
pub use errors::*;
pub use identity::*;
pub use value_objects::*;
