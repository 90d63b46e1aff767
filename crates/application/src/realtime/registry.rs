use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use domain::{HubRole, Timestamp};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use super::HubError;

/// 已编码的出站帧，广播时所有会话共享同一份
pub type OutboundFrame = Arc<str>;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// 会话描述信息
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub role: HubRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub joined_at: Timestamp,
}

impl SessionInfo {
    pub fn new(
        id: impl Into<String>,
        role: HubRole,
        room_id: Option<String>,
        joined_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            room_id: room_id.filter(|room| !room.is_empty()),
            metadata: BTreeMap::new(),
            joined_at,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 对外展示时去掉令牌类元数据
    pub fn redacted(&self) -> Self {
        let mut info = self.clone();
        info.metadata
            .retain(|key, _| !key.to_ascii_lowercase().contains("token"));
        info
    }
}

/// 注册表中的一个会话：描述信息加出站队列的发送端
#[derive(Debug)]
pub struct Session {
    info: SessionInfo,
    serial: u64,
    sender: mpsc::Sender<OutboundFrame>,
}

impl Session {
    /// 创建会话与其有界出站队列，接收端交给写泵
    pub fn new(info: SessionInfo, capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let session = Self {
            info,
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            sender,
        };
        (session, receiver)
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    /// 同一 id 的先后会话以序号区分，迟到的注销不会误删新会话
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

/// 一次投递的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub evicted: Vec<String>,
}

enum Offer {
    Delivered,
    Evicted,
    Gone,
}

/// 会话注册表，只由事件循环访问
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    rooms: HashMap<String, HashSet<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn room_members(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, HashSet::len)
    }

    /// 注册会话；同 id 的旧会话被替换，其出站队列随之关闭
    pub fn register(&mut self, session: Session) -> Option<SessionInfo> {
        let id = session.id().to_string();
        let superseded = self.remove(&id);
        if let Some(previous) = &superseded {
            info!(
                session_id = %id,
                from_role = %previous.role,
                to_role = %session.info.role,
                "session superseded by a new connection with the same id"
            );
        }

        if let Some(room_id) = &session.info.room_id {
            self.rooms
                .entry(room_id.clone())
                .or_default()
                .insert(id.clone());
        }
        debug!(session_id = %id, role = %session.info.role, "session registered");
        self.sessions.insert(id, session);
        superseded
    }

    /// 注销会话；序号不匹配说明已被替换，忽略
    pub fn unregister(&mut self, id: &str, serial: u64) -> bool {
        match self.sessions.get(id) {
            Some(session) if session.serial == serial => {
                self.remove(id);
                debug!(session_id = %id, "session unregistered");
                true
            }
            _ => false,
        }
    }

    fn remove(&mut self, id: &str) -> Option<SessionInfo> {
        let session = self.sessions.remove(id)?;
        if let Some(room_id) = &session.info.room_id {
            if let Some(members) = self.rooms.get_mut(room_id) {
                members.remove(id);
                if members.is_empty() {
                    self.rooms.remove(room_id);
                }
            }
        }
        // 丢弃发送端即关闭出站队列
        Some(session.info)
    }

    pub fn broadcast_all(&mut self, frame: &OutboundFrame) -> DeliveryReport {
        let targets: Vec<String> = self.sessions.keys().cloned().collect();
        self.deliver(targets, frame)
    }

    pub fn broadcast_to_roles(&mut self, roles: &[HubRole], frame: &OutboundFrame) -> DeliveryReport {
        let targets: Vec<String> = self
            .sessions
            .values()
            .filter(|session| roles.contains(&session.info.role))
            .map(|session| session.info.id.clone())
            .collect();
        self.deliver(targets, frame)
    }

    pub fn broadcast_to_room(&mut self, room_id: &str, frame: &OutboundFrame) -> DeliveryReport {
        let targets: Vec<String> = self
            .rooms
            .get(room_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();
        self.deliver(targets, frame)
    }

    /// 定向发送，只投递给角色为 user 的目标会话
    pub fn send_direct(&mut self, id: &str, frame: &OutboundFrame) -> Result<(), HubError> {
        match self.sessions.get(id) {
            Some(session) if session.info.role == HubRole::User => {}
            _ => return Err(HubError::TargetNotFound(id.to_string())),
        }
        match self.offer(id, frame) {
            Offer::Delivered => Ok(()),
            Offer::Evicted => Err(HubError::Evicted(id.to_string())),
            Offer::Gone => Err(HubError::TargetNotFound(id.to_string())),
        }
    }

    fn deliver(&mut self, targets: Vec<String>, frame: &OutboundFrame) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for id in targets {
            match self.offer(&id, frame) {
                Offer::Delivered => report.delivered += 1,
                Offer::Evicted => report.evicted.push(id),
                Offer::Gone => {}
            }
        }
        report
    }

    /// 非阻塞入队；队列已满则驱逐会话，不保留该帧
    fn offer(&mut self, id: &str, frame: &OutboundFrame) -> Offer {
        let Some(session) = self.sessions.get(id) else {
            return Offer::Gone;
        };
        match session.sender.try_send(Arc::clone(frame)) {
            Ok(()) => Offer::Delivered,
            Err(TrySendError::Full(_)) => {
                warn!(session_id = %id, "outbound queue full, evicting session");
                self.remove(id);
                Offer::Evicted
            }
            Err(TrySendError::Closed(_)) => {
                debug!(session_id = %id, "outbound queue already closed");
                self.remove(id);
                Offer::Gone
            }
        }
    }

    /// 在线会话列表，按加入时间排序且不含令牌
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .values()
            .map(|session| session.info.redacted())
            .collect();
        sessions.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    pub fn counts_by_role(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for session in self.sessions.values() {
            *counts
                .entry(session.info.role.as_str().to_string())
                .or_insert(0) += 1;
        }
        counts
    }
}
