//! 实时推送中心
//!
//! 会话注册表由单个事件循环独占，注册、注销与广播都经由命令通道串行执行。
//! 每个会话只有一个有界出站队列：事件循环是唯一生产者，写泵是唯一消费者。

mod dispatcher;
mod handlers;
mod hub;
mod registry;


use thiserror::Error;

pub use dispatcher::{Dispatcher, FrameHandler};
pub use handlers::{DeliveryHandler, OrderHandler};
pub use hub::{BroadcastTarget, Hub, HubHandle};
pub use registry::{DeliveryReport, OutboundFrame, Session, SessionInfo, SessionRegistry};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HubError {
    #[error("hub is not running")]
    Closed,
    #[error("failed to encode frame: {0}")]
    Serialize(String),
    #[error("invalid frame payload: {0}")]
    InvalidFrame(String),
    #[error("session {0} not found")]
    TargetNotFound(String),
    #[error("session {0} was evicted")]
    Evicted(String),
}
