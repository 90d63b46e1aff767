use domain::{Account, AccountStatus, Timestamp};
use serde::{Deserialize, Serialize};

/// 对外暴露的账户摘要（不含密码哈希）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub id: i64,
    pub branch_id: Option<i64>,
    pub name: String,
    pub email: String,
    pub avatar: Option<String>,
    pub title: Option<String>,
    pub role: String,
    pub owner_id: Option<i64>,
    pub status: AccountStatus,
    pub email_verified: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.0,
            branch_id: account.branch_id,
            name: account.name.clone(),
            email: account.email.as_str().to_owned(),
            avatar: account.avatar.clone(),
            title: account.title.clone(),
            role: account.role.clone(),
            owner_id: account.owner_id,
            status: account.status,
            email_verified: account.email_verified,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
    pub total_count: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PageInfo {
    pub fn new(page: u32, page_size: u32, total_count: u64) -> Self {
        let size = u64::from(page_size.max(1));
        let total_pages = total_count.div_ceil(size);
        Self {
            page,
            page_size,
            total_pages,
            total_count,
            has_next: u64::from(page) < total_pages,
            has_prev: page > 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    pub items: Vec<T>,
    #[serde(flatten)]
    pub page_info: PageInfo,
}

/// 登录/刷新返回的令牌对
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub access_expires_at: Timestamp,
    pub refresh_token: String,
    pub refresh_expires_at: Timestamp,
    pub token_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub account: AccountSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TokenValidation {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            user_id: None,
            expires_at: None,
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_info_flags() {
        let info = PageInfo::new(1, 10, 25);
        assert_eq!(info.total_pages, 3);
        assert!(info.has_next);
        assert!(!info.has_prev);

        let last = PageInfo::new(3, 10, 25);
        assert!(!last.has_next);
        assert!(last.has_prev);

        let empty = PageInfo::new(1, 10, 0);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next);
    }
}
