//! 内置帧处理器：订单与配送

use async_trait::async_trait;
use domain::{DirectMessage, Frame, HubRole};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::dispatcher::FrameHandler;
use super::hub::HubHandle;
use super::registry::SessionInfo;
use super::HubError;

fn envelope(frame: &Frame) -> Result<DirectMessage, HubError> {
    serde_json::from_value(frame.payload.clone())
        .map_err(|err| HubError::InvalidFrame(err.to_string()))
}

/// 定向发送失败不影响员工广播，只记录
async fn forward_direct(hub: &HubHandle, origin: &SessionInfo, message: DirectMessage) {
    if message.to_user_id.is_empty() {
        return;
    }
    let to = message.to_user_id.clone();
    if let Err(err) = hub.send_direct(message).await {
        debug!(session_id = %origin.id, to = %to, error = %err, "direct send skipped");
    }
}

/// 订单：内层载荷广播给员工，create 另外定向发送给收件人
pub struct OrderHandler {
    hub: HubHandle,
}

impl OrderHandler {
    pub fn new(hub: HubHandle) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl FrameHandler for OrderHandler {
    async fn handle(&self, origin: &SessionInfo, frame: Frame) -> Result<(), HubError> {
        let message = envelope(&frame)?;
        let report = self.hub.notify_staff_order(message.payload.clone()).await?;
        info!(
            session_id = %origin.id,
            from = %message.from_user_id,
            delivered = report.delivered,
            "order pushed to staff"
        );

        if frame.action == "create" {
            forward_direct(&self.hub, origin, message).await;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct StatusUpdate {
    delivery_id: Value,
    status: String,
}

#[derive(Debug, Deserialize)]
struct Assignment {
    delivery_id: Value,
    driver_id: Value,
}

/// 配送：新建、状态变更与指派司机
pub struct DeliveryHandler {
    hub: HubHandle,
}

impl DeliveryHandler {
    pub fn new(hub: HubHandle) -> Self {
        Self { hub }
    }

    async fn to_staff(&self, action: &str, payload: Value) -> Result<usize, HubError> {
        let frame = Frame::new("delivery", action, payload, HubRole::Employee);
        let report = self.hub.broadcast_to_roles(&HubRole::STAFF, &frame).await?;
        Ok(report.delivered)
    }
}

#[async_trait]
impl FrameHandler for DeliveryHandler {
    async fn handle(&self, origin: &SessionInfo, frame: Frame) -> Result<(), HubError> {
        match frame.action.as_str() {
            "create" => {
                let message = envelope(&frame)?;
                let delivered = self.to_staff("new_delivery", message.payload.clone()).await?;
                info!(session_id = %origin.id, delivered, "delivery fanned out to staff");
                forward_direct(&self.hub, origin, message).await;
            }
            "update_status" => {
                let update: StatusUpdate = serde_json::from_value(frame.payload)
                    .map_err(|err| HubError::InvalidFrame(err.to_string()))?;
                self.to_staff(
                    "status_updated",
                    json!({"delivery_id": update.delivery_id, "status": update.status}),
                )
                .await?;
            }
            "assign" => {
                let assignment: Assignment = serde_json::from_value(frame.payload)
                    .map_err(|err| HubError::InvalidFrame(err.to_string()))?;
                self.to_staff(
                    "driver_assigned",
                    json!({"delivery_id": assignment.delivery_id, "driver_id": assignment.driver_id}),
                )
                .await?;
            }
            other => debug!(action = %other, "unsupported delivery action"),
        }
        Ok(())
    }
}
