//! 实时推送的领域模型：角色、帧、直发信封与会话状态机

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DomainError;

/// 实时通道中的连接角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HubRole {
    Admin,
    Manager,
    Employee,
    Kitchen,
    User,
    Guest,
}

impl HubRole {
    /// 接收运营事件的员工集合
    pub const STAFF: [HubRole; 3] = [HubRole::Admin, HubRole::Employee, HubRole::Kitchen];

    /// 可以通过令牌接口签发的角色
    pub const ISSUABLE: [HubRole; 5] = [
        HubRole::Admin,
        HubRole::Employee,
        HubRole::Kitchen,
        HubRole::User,
        HubRole::Guest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Employee => "employee",
            Self::Kitchen => "kitchen",
            Self::User => "user",
            Self::Guest => "guest",
        }
    }

    pub fn is_staff(&self) -> bool {
        Self::STAFF.contains(self)
    }

    pub fn is_issuable(&self) -> bool {
        Self::ISSUABLE.contains(self)
    }
}

impl fmt::Display for HubRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HubRole {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "manager" => Ok(Self::Manager),
            "employee" => Ok(Self::Employee),
            "kitchen" => Ok(Self::Kitchen),
            "user" => Ok(Self::User),
            "guest" => Ok(Self::Guest),
            other => Err(DomainError::validation_error(
                "role",
                format!("unknown realtime role '{other}'"),
            )),
        }
    }
}

/// 双向通用的消息帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    pub action: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

impl Frame {
    pub fn new(kind: impl Into<String>, action: impl Into<String>, payload: Value, role: HubRole) -> Self {
        Self {
            kind: kind.into(),
            action: action.into(),
            payload,
            role: role.as_str().to_string(),
            room_id: None,
        }
    }
}

/// 直发信封；外层 payload 里再包一层业务 payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub from_user_id: String,
    pub to_user_id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

/// 会话生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Upgrading,
    Registered,
    Closing,
    Closed,
}

impl SessionState {
    /// 只允许 Upgrading -> Registered -> Closing -> Closed，以及升级阶段直接关闭
    pub fn advance(self, next: SessionState) -> Result<SessionState, DomainError> {
        use SessionState::*;
        match (self, next) {
            (Upgrading, Registered)
            | (Upgrading, Closing)
            | (Registered, Closing)
            | (Closing, Closed) => Ok(next),
            (Closing, Closing) => Ok(Closing),
            _ => Err(DomainError::InvalidTransition {
                from: format!("{self:?}"),
                to: format!("{next:?}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_wire_shape() {
        let frame: Frame = serde_json::from_value(json!({
            "type": "order",
            "action": "create",
            "payload": {"id": 1},
            "role": "user",
            "roomId": "table-3"
        }))
        .unwrap();
        assert_eq!(frame.kind, "order");
        assert_eq!(frame.room_id.as_deref(), Some("table-3"));

        let out = serde_json::to_value(Frame::new("order", "new_order", json!({}), HubRole::Employee)).unwrap();
        assert_eq!(out, json!({"type": "order", "action": "new_order", "payload": {}, "role": "employee"}));
    }

    #[test]
    fn test_direct_message_envelope() {
        let msg: DirectMessage = serde_json::from_value(json!({
            "fromUserId": "u3",
            "toUserId": "u99",
            "payload": {"order": 1}
        }))
        .unwrap();
        assert_eq!(msg.to_user_id, "u99");
        assert_eq!(msg.payload, json!({"order": 1}));
    }

    #[test]
    fn test_staff_set() {
        assert!(HubRole::Kitchen.is_staff());
        assert!(!HubRole::Manager.is_staff());
        assert!(!HubRole::Manager.is_issuable());
        assert_eq!("ADMIN".parse::<HubRole>().unwrap(), HubRole::Admin);
    }

    #[test]
    fn test_session_state_transitions() {
        let state = SessionState::Upgrading
            .advance(SessionState::Registered)
            .and_then(|s| s.advance(SessionState::Closing))
            .and_then(|s| s.advance(SessionState::Closed))
            .unwrap();
        assert_eq!(state, SessionState::Closed);
        assert!(SessionState::Closed.advance(SessionState::Registered).is_err());
        assert!(SessionState::Registered.advance(SessionState::Upgrading).is_err());
    }
}
