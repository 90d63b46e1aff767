use std::collections::BTreeMap;
use std::sync::Arc;

use domain::{DirectMessage, Frame, HubRole};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::{DeliveryReport, OutboundFrame, Session, SessionInfo, SessionRegistry};
use super::HubError;

/// 广播目标
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastTarget {
    All,
    Roles(Vec<HubRole>),
    Room(String),
}

enum HubCommand {
    Register {
        session: Session,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        id: String,
        serial: u64,
    },
    Broadcast {
        target: BroadcastTarget,
        frame: OutboundFrame,
        reply: oneshot::Sender<DeliveryReport>,
    },
    Direct {
        to: String,
        frame: OutboundFrame,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    List {
        reply: oneshot::Sender<Vec<SessionInfo>>,
    },
    Counts {
        reply: oneshot::Sender<BTreeMap<String, usize>>,
    },
}

/// 事件循环：独占注册表，逐条处理命令
pub struct Hub {
    registry: SessionRegistry,
    commands: mpsc::UnboundedReceiver<HubCommand>,
}

impl Hub {
    /// 启动事件循环；所有句柄被丢弃后循环退出
    pub fn spawn() -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Hub {
            registry: SessionRegistry::new(),
            commands: rx,
        };
        let task = tokio::spawn(hub.run());
        (HubHandle { commands: tx }, task)
    }

    async fn run(mut self) {
        info!("realtime hub started");
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
        }
        info!(remaining = self.registry.len(), "realtime hub stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { session, ack } => {
                self.registry.register(session);
                let _ = ack.send(());
            }
            HubCommand::Unregister { id, serial } => {
                self.registry.unregister(&id, serial);
            }
            HubCommand::Broadcast {
                target,
                frame,
                reply,
            } => {
                let report = match &target {
                    BroadcastTarget::All => self.registry.broadcast_all(&frame),
                    BroadcastTarget::Roles(roles) => self.registry.broadcast_to_roles(roles, &frame),
                    BroadcastTarget::Room(room_id) => self.registry.broadcast_to_room(room_id, &frame),
                };
                if !report.evicted.is_empty() {
                    warn!(target = ?target, evicted = report.evicted.len(), "broadcast evicted slow sessions");
                }
                let _ = reply.send(report);
            }
            HubCommand::Direct { to, frame, reply } => {
                let _ = reply.send(self.registry.send_direct(&to, &frame));
            }
            HubCommand::List { reply } => {
                let _ = reply.send(self.registry.list());
            }
            HubCommand::Counts { reply } => {
                let _ = reply.send(self.registry.counts_by_role());
            }
        }
    }
}

/// 推送中心句柄，可在任意任务间克隆共享
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<HubCommand>,
}

fn encode(frame: &Frame) -> Result<OutboundFrame, HubError> {
    serde_json::to_string(frame)
        .map(Arc::from)
        .map_err(|err| HubError::Serialize(err.to_string()))
}

impl HubHandle {
    fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands.send(command).map_err(|_| HubError::Closed)
    }

    /// 注册会话，返回时事件循环已接受该会话
    pub async fn register(&self, session: Session) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.send(HubCommand::Register { session, ack })?;
        done.await.map_err(|_| HubError::Closed)
    }

    /// 注销会话；事件循环已停止时静默忽略
    pub fn unregister(&self, id: &str, serial: u64) {
        if self
            .send(HubCommand::Unregister {
                id: id.to_string(),
                serial,
            })
            .is_err()
        {
            debug!(session_id = %id, "unregister after hub shutdown");
        }
    }

    pub async fn broadcast(
        &self,
        target: BroadcastTarget,
        frame: &Frame,
    ) -> Result<DeliveryReport, HubError> {
        let frame = encode(frame)?;
        let (reply, result) = oneshot::channel();
        self.send(HubCommand::Broadcast {
            target,
            frame,
            reply,
        })?;
        result.await.map_err(|_| HubError::Closed)
    }

    pub async fn broadcast_all(&self, frame: &Frame) -> Result<DeliveryReport, HubError> {
        self.broadcast(BroadcastTarget::All, frame).await
    }

    pub async fn broadcast_to_roles(
        &self,
        roles: &[HubRole],
        frame: &Frame,
    ) -> Result<DeliveryReport, HubError> {
        self.broadcast(BroadcastTarget::Roles(roles.to_vec()), frame)
            .await
    }

    pub async fn broadcast_to_room(
        &self,
        room_id: &str,
        frame: &Frame,
    ) -> Result<DeliveryReport, HubError> {
        self.broadcast(BroadcastTarget::Room(room_id.to_string()), frame)
            .await
    }

    /// 定向消息：外层帧的载荷是完整的直发信封
    pub async fn send_direct(&self, message: DirectMessage) -> Result<(), HubError> {
        let to = message.to_user_id.clone();
        let kind = message.kind.clone();
        let action = message.action.clone();
        let payload = serde_json::to_value(&message).map_err(|err| HubError::Serialize(err.to_string()))?;
        let frame = encode(&Frame::new(kind, action, payload, HubRole::User))?;

        let (reply, result) = oneshot::channel();
        self.send(HubCommand::Direct { to, frame, reply })?;
        result.await.map_err(|_| HubError::Closed)?
    }

    /// 外部生产者入口：新订单推送给全部员工
    pub async fn notify_staff_order(&self, order: Value) -> Result<DeliveryReport, HubError> {
        let frame = Frame::new("order", "new_order", order, HubRole::Employee);
        self.broadcast_to_roles(&HubRole::STAFF, &frame).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionInfo>, HubError> {
        let (reply, result) = oneshot::channel();
        self.send(HubCommand::List { reply })?;
        result.await.map_err(|_| HubError::Closed)
    }

    pub async fn counts_by_role(&self) -> Result<BTreeMap<String, usize>, HubError> {
        let (reply, result) = oneshot::channel();
        self.send(HubCommand::Counts { reply })?;
        result.await.map_err(|_| HubError::Closed)
    }
}
