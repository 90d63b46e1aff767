use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::Frame;
use tracing::{debug, warn};

use super::handlers::{DeliveryHandler, OrderHandler};
use super::hub::HubHandle;
use super::registry::SessionInfo;
use super::HubError;

/// 入站帧处理器
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn handle(&self, origin: &SessionInfo, frame: Frame) -> Result<(), HubError>;
}

/// (type, action) 到处理器的路由表
#[derive(Default, Clone)]
pub struct Dispatcher {
    routes: HashMap<(String, String), Arc<dyn FrameHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 默认路由：订单（order 与 message 两种类型）和配送
    pub fn with_default_routes(hub: HubHandle) -> Self {
        let order: Arc<dyn FrameHandler> = Arc::new(OrderHandler::new(hub.clone()));
        let delivery: Arc<dyn FrameHandler> = Arc::new(DeliveryHandler::new(hub));

        let mut dispatcher = Self::new();
        for kind in ["order", "message"] {
            for action in ["create", "create_message"] {
                dispatcher = dispatcher.route(kind, action, Arc::clone(&order));
            }
        }
        for action in ["create", "update_status", "assign"] {
            dispatcher = dispatcher.route("delivery", action, Arc::clone(&delivery));
        }
        dispatcher
    }

    pub fn route(
        mut self,
        kind: impl Into<String>,
        action: impl Into<String>,
        handler: Arc<dyn FrameHandler>,
    ) -> Self {
        self.routes.insert((kind.into(), action.into()), handler);
        self
    }

    pub fn handles(&self, kind: &str, action: &str) -> bool {
        self.routes
            .contains_key(&(kind.to_string(), action.to_string()))
    }

    /// 分发一帧；未知路由在 debug 级别记录后丢弃，返回是否命中
    pub async fn dispatch(&self, origin: &SessionInfo, frame: Frame) -> bool {
        let key = (frame.kind.clone(), frame.action.clone());
        let Some(handler) = self.routes.get(&key) else {
            debug!(
                session_id = %origin.id,
                frame_type = %frame.kind,
                action = %frame.action,
                "no handler for frame, dropped"
            );
            return false;
        };

        if let Err(err) = handler.handle(origin, frame).await {
            warn!(
                session_id = %origin.id,
                frame_type = %key.0,
                action = %key.1,
                error = %err,
                "frame handler failed"
            );
        }
        true
    }

    /// 解析原始文本帧后分发，无法解析的帧直接丢弃
    pub async fn dispatch_text(&self, origin: &SessionInfo, text: &str) -> bool {
        match serde_json::from_str::<Frame>(text) {
            Ok(frame) => self.dispatch(origin, frame).await,
            Err(err) => {
                debug!(session_id = %origin.id, error = %err, "malformed frame dropped");
                false
            }
        }
    }
}
