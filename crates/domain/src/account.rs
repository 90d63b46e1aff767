//! 账户实体

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{AccountId, Email, PasswordHash, Timestamp};

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_MANAGER: &str = "manager";

/// 账户状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
    Suspended,
    Pending,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Suspended => "suspended",
            Self::Pending => "pending",
        }
    }

    /// 是否允许登录
    pub fn can_sign_in(&self) -> bool {
        matches!(self, Self::Active | Self::Pending)
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "suspended" => Ok(Self::Suspended),
            "pending" => Ok(Self::Pending),
            other => Err(DomainError::validation_error(
                "status",
                format!("unknown account status '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: AccountId,
    pub branch_id: Option<i64>,
    pub name: String,
    pub email: Email,
    pub password_hash: PasswordHash,
    pub avatar: Option<String>,
    pub title: Option<String>,
    pub role: String,
    pub owner_id: Option<i64>,
    pub status: AccountStatus,
    pub email_verified: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl Account {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn is_admin(&self) -> bool {
        self.role.eq_ignore_ascii_case(ROLE_ADMIN)
    }

    /// 应用选择性更新：只覆盖提供了的字段
    pub fn apply(&mut self, changes: &AccountChanges, now: Timestamp) {
        if let Some(name) = &changes.name {
            self.name = name.clone();
        }
        if let Some(email) = &changes.email {
            self.email = email.clone();
        }
        if let Some(avatar) = &changes.avatar {
            self.avatar = Some(avatar.clone());
        }
        if let Some(title) = &changes.title {
            self.title = Some(title.clone());
        }
        if let Some(role) = &changes.role {
            self.role = role.clone();
        }
        if let Some(owner_id) = changes.owner_id {
            self.owner_id = Some(owner_id);
        }
        if let Some(branch_id) = changes.branch_id {
            self.branch_id = Some(branch_id);
        }
        self.updated_at = now;
    }
}

/// 待插入的账户，`id` 由存储层分配
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub branch_id: Option<i64>,
    pub name: String,
    pub email: Email,
    pub password_hash: PasswordHash,
    pub avatar: Option<String>,
    pub title: Option<String>,
    pub role: String,
    pub owner_id: Option<i64>,
    pub status: AccountStatus,
    pub created_at: Timestamp,
}

impl NewAccount {
    /// 自助注册只设置最少的字段
    pub fn registration(
        name: String,
        email: Email,
        password_hash: PasswordHash,
        branch_id: Option<i64>,
        role: String,
        status: AccountStatus,
        now: Timestamp,
    ) -> Self {
        Self {
            branch_id,
            name,
            email,
            password_hash,
            avatar: None,
            title: None,
            role,
            owner_id: None,
            status,
            created_at: now,
        }
    }

    pub fn into_account(self, id: AccountId) -> Account {
        Account {
            id,
            branch_id: self.branch_id,
            name: self.name,
            email: self.email,
            password_hash: self.password_hash,
            avatar: self.avatar,
            title: self.title,
            role: self.role,
            owner_id: self.owner_id,
            status: self.status,
            email_verified: false,
            created_at: self.created_at,
            updated_at: self.created_at,
            deleted_at: None,
        }
    }
}

/// 选择性更新：`None` 表示保持原值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountChanges {
    pub name: Option<String>,
    pub email: Option<Email>,
    pub avatar: Option<String>,
    pub title: Option<String>,
    pub role: Option<String>,
    pub owner_id: Option<i64>,
    pub branch_id: Option<i64>,
}

impl AccountChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// 发起操作的调用者身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub account_id: AccountId,
    pub role: String,
    pub branch_id: Option<i64>,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role.eq_ignore_ascii_case(ROLE_ADMIN)
    }

    pub fn is_manager(&self) -> bool {
        self.role.eq_ignore_ascii_case(ROLE_MANAGER)
    }

    /// 三级权限：本人、管理员、同分店经理
    pub fn may_manage(&self, target: &Account) -> bool {
        if self.account_id == target.id || self.is_admin() {
            return true;
        }
        self.is_manager() && self.branch_id.is_some() && self.branch_id == target.branch_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn account(id: i64, branch: Option<i64>) -> Account {
        NewAccount::registration(
            "Target".into(),
            Email::parse(format!("user{id}@example.com")).unwrap(),
            PasswordHash::new("hash").unwrap(),
            branch,
            "user".into(),
            AccountStatus::Active,
            Utc::now(),
        )
        .into_account(AccountId(id))
    }

    fn actor(id: i64, role: &str, branch: Option<i64>) -> Actor {
        Actor {
            account_id: AccountId(id),
            role: role.into(),
            branch_id: branch,
        }
    }

    #[test]
    fn test_self_admin_and_branch_manager_permitted() {
        let target = account(7, Some(1));
        assert!(actor(7, "user", None).may_manage(&target));
        assert!(actor(1, "admin", None).may_manage(&target));
        assert!(actor(2, "manager", Some(1)).may_manage(&target));
    }

    #[test]
    fn test_other_callers_denied() {
        let target = account(7, Some(1));
        assert!(!actor(3, "user", Some(1)).may_manage(&target));
        assert!(!actor(2, "manager", Some(2)).may_manage(&target));
        assert!(!actor(2, "manager", None).may_manage(&account(8, None)));
    }

    #[test]
    fn test_apply_changes_only_touches_given_fields() {
        let mut target = account(7, Some(1));
        let later = target.updated_at + chrono::Duration::seconds(5);
        target.apply(
            &AccountChanges {
                title: Some("Chef".into()),
                ..Default::default()
            },
            later,
        );
        assert_eq!(target.title.as_deref(), Some("Chef"));
        assert_eq!(target.name, "Target");
        assert_eq!(target.branch_id, Some(1));
        assert_eq!(target.updated_at, later);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("Suspended".parse::<AccountStatus>().unwrap(), AccountStatus::Suspended);
        assert!("deleted".parse::<AccountStatus>().is_err());
    }
}
