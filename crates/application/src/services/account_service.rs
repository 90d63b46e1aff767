use std::sync::Arc;

use config::{AppConfig, ConfigHandle};
use domain::{
    Account, AccountChanges, AccountId, AccountRepository, AccountStatus, Actor, Email,
    NewAccount, SearchCriteria, SortField, SortOrder,
};

use crate::{
    clock::Clock,
    dto::{AccountSummary, PageInfo, Paged},
    email::{EmailDispatcher, EmailMessage},
    error::ApplicationError,
    password::PasswordHasher,
};

use super::password_policy;

#[derive(Debug, Clone, Default)]
pub struct CreateAccountRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Option<String>,
    pub status: Option<String>,
    pub branch_id: Option<i64>,
    pub owner_id: Option<i64>,
    pub avatar: Option<String>,
    pub title: Option<String>,
}

/// 选择性更新：空字符串与 0 视为“不修改”
#[derive(Debug, Clone, Default)]
pub struct UpdateAccountRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
    pub title: Option<String>,
    pub role: Option<String>,
    pub owner_id: Option<i64>,
    pub branch_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchAccountsRequest {
    pub query: Option<String>,
    pub role: Option<String>,
    pub branch_id: Option<i64>,
    pub statuses: Vec<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

pub struct AccountServiceDependencies {
    pub account_repository: Arc<dyn AccountRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub email: EmailDispatcher,
    pub clock: Arc<dyn Clock>,
    pub config: ConfigHandle,
}

/// 账户管理：增删改查、状态迁移、搜索与分店/角色查询
pub struct AccountService {
    deps: AccountServiceDependencies,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn non_zero(value: Option<i64>) -> Option<i64> {
    value.filter(|v| *v > 0)
}

/// 钳制页码与页大小：页码至少为 1，页大小落在 [1, max]
fn clamp_page(config: &AppConfig, page: Option<u32>, page_size: Option<u32>) -> (u32, u32) {
    let page = page.unwrap_or(1).max(1);
    let page_size = match page_size {
        None | Some(0) => config.pagination.default_size,
        Some(size) => size,
    }
    .clamp(1, config.pagination.max_size);
    (page, page_size)
}

impl AccountService {
    pub fn new(deps: AccountServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn create_user(
        &self,
        actor: &Actor,
        request: CreateAccountRequest,
    ) -> Result<AccountSummary, ApplicationError> {
        self.create_user_inner(actor, request)
            .await
            .map_err(|err| err.context("create_user"))
    }

    async fn create_user_inner(
        &self,
        actor: &Actor,
        request: CreateAccountRequest,
    ) -> Result<AccountSummary, ApplicationError> {
        let config = self.deps.config.current();
        let role = non_empty(request.role).unwrap_or_else(|| config.accounts.default_role.clone());
        let branch_id = non_zero(request.branch_id);

        if !actor.is_admin() {
            let same_branch = actor.branch_id.is_some() && actor.branch_id == branch_id;
            if !(actor.is_manager() && same_branch) {
                return Err(ApplicationError::forbidden(
                    "only admins or managers of the same branch may create accounts",
                ));
            }
            if role.eq_ignore_ascii_case(domain::ROLE_ADMIN) {
                return Err(ApplicationError::forbidden("managers cannot create admins"));
            }
        }

        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(ApplicationError::validation("name", "cannot be empty"));
        }
        let email = Email::parse(request.email)?;
        let role = self.validate_role(&config, &role)?;
        let status = match non_empty(request.status) {
            Some(status) => self.validate_status(&config, &status)?,
            None => AccountStatus::Active,
        };
        password_policy(&config).check(&request.password)?;

        if self
            .deps
            .account_repository
            .exists_by_email(email.clone())
            .await?
        {
            return Err(ApplicationError::DuplicateEmail);
        }

        let password_hash = self.deps.password_hasher.hash(&request.password).await?;
        let account = NewAccount {
            branch_id,
            name,
            email,
            password_hash,
            avatar: non_empty(request.avatar),
            title: non_empty(request.title),
            role,
            owner_id: non_zero(request.owner_id).or(Some(actor.account_id.0)),
            status,
            created_at: self.deps.clock.now(),
        };

        let stored = self.deps.account_repository.create(account).await?;
        tracing::info!(account_id = %stored.id, actor_id = %actor.account_id, "account created");
        Ok(AccountSummary::from(&stored))
    }

    pub async fn find_by_id(&self, id: AccountId) -> Result<AccountSummary, ApplicationError> {
        self.load(id)
            .await
            .map(|account| AccountSummary::from(&account))
            .map_err(|err| err.context("find_by_id"))
    }

    pub async fn find_by_email(&self, email: &str) -> Result<AccountSummary, ApplicationError> {
        self.find_by_email_inner(email)
            .await
            .map(|account| AccountSummary::from(&account))
            .map_err(|err| err.context("find_by_email"))
    }

    async fn find_by_email_inner(&self, email: &str) -> Result<Account, ApplicationError> {
        let email = Email::parse(email)?;
        self.deps
            .account_repository
            .find_by_email(email)
            .await?
            .ok_or(ApplicationError::UserNotFound)
    }

    pub async fn find_all(&self) -> Result<Vec<AccountSummary>, ApplicationError> {
        let accounts = self
            .deps
            .account_repository
            .find_all_live()
            .await
            .map_err(|err| ApplicationError::from(err).context("find_all"))?;
        Ok(self.summaries(accounts))
    }

    pub async fn find_by_role(&self, role: &str) -> Result<Vec<AccountSummary>, ApplicationError> {
        let config = self.deps.config.current();
        let role = self
            .validate_role(&config, role)
            .map_err(|err| err.context("find_by_role"))?;
        let accounts = self
            .deps
            .account_repository
            .find_by_role(role)
            .await
            .map_err(|err| ApplicationError::from(err).context("find_by_role"))?;
        Ok(self.summaries(accounts))
    }

    pub async fn find_by_branch(&self, branch_id: i64) -> Result<Vec<AccountSummary>, ApplicationError> {
        let accounts = self
            .deps
            .account_repository
            .find_by_branch(branch_id)
            .await
            .map_err(|err| ApplicationError::from(err).context("find_by_branch"))?;
        Ok(self.summaries(accounts))
    }

    pub async fn find_by_owner(&self, owner_id: i64) -> Result<Vec<AccountSummary>, ApplicationError> {
        let accounts = self
            .deps
            .account_repository
            .find_by_owner(owner_id)
            .await
            .map_err(|err| ApplicationError::from(err).context("find_by_owner"))?;
        Ok(self.summaries(accounts))
    }

    pub async fn get_users_by_branch(
        &self,
        branch_id: i64,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> Result<Paged<AccountSummary>, ApplicationError> {
        let config = self.deps.config.current();
        let (page, page_size) = clamp_page(&config, page, page_size);
        let offset = u64::from(page - 1) * u64::from(page_size);

        let result = self
            .deps
            .account_repository
            .find_by_branch_paged(branch_id, offset, page_size)
            .await
            .map_err(|err| ApplicationError::from(err).context("get_users_by_branch"))?;

        Ok(Paged {
            items: result.items.iter().map(AccountSummary::from).collect(),
            page_info: PageInfo::new(page, page_size, result.total),
        })
    }

    pub async fn search(
        &self,
        request: SearchAccountsRequest,
    ) -> Result<Paged<AccountSummary>, ApplicationError> {
        let config = self.deps.config.current();
        let criteria = self
            .criteria(&config, request)
            .map_err(|err| err.context("search_users"))?;
        let (page, page_size) = (criteria.page, criteria.page_size);

        let result = self
            .deps
            .account_repository
            .search(criteria)
            .await
            .map_err(|err| ApplicationError::from(err).context("search_users"))?;

        Ok(Paged {
            items: result.items.iter().map(AccountSummary::from).collect(),
            page_info: PageInfo::new(page, page_size, result.total),
        })
    }

    fn criteria(
        &self,
        config: &AppConfig,
        request: SearchAccountsRequest,
    ) -> Result<SearchCriteria, ApplicationError> {
        let role = match non_empty(request.role) {
            Some(role) => Some(self.validate_role(config, &role)?),
            None => None,
        };
        let statuses = request
            .statuses
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| self.validate_status(config, s))
            .collect::<Result<Vec<_>, _>>()?;
        let (page, page_size) = clamp_page(config, request.page, request.page_size);

        Ok(SearchCriteria {
            query: non_empty(request.query),
            role,
            branch_id: non_zero(request.branch_id),
            statuses,
            page,
            page_size,
            sort_by: request
                .sort_by
                .as_deref()
                .map(SortField::parse_or_default)
                .unwrap_or_default(),
            sort_order: request
                .sort_order
                .as_deref()
                .map(SortOrder::parse_or_default)
                .unwrap_or_default(),
        })
    }

    pub async fn update_user(
        &self,
        actor: &Actor,
        id: AccountId,
        request: UpdateAccountRequest,
    ) -> Result<AccountSummary, ApplicationError> {
        self.update_user_inner(actor, id, request)
            .await
            .map_err(|err| err.context("update_user"))
    }

    async fn update_user_inner(
        &self,
        actor: &Actor,
        id: AccountId,
        request: UpdateAccountRequest,
    ) -> Result<AccountSummary, ApplicationError> {
        let config = self.deps.config.current();
        self.authorize(actor, id).await?;

        let changes = AccountChanges {
            name: non_empty(request.name),
            email: non_empty(request.email).map(Email::parse).transpose()?,
            avatar: non_empty(request.avatar),
            title: non_empty(request.title),
            role: match non_empty(request.role) {
                Some(role) => Some(self.validate_role(&config, &role)?),
                None => None,
            },
            owner_id: non_zero(request.owner_id),
            branch_id: non_zero(request.branch_id),
        };

        // 角色只能由管理员调整；归属关系需要管理员或经理
        if changes.role.is_some() && !actor.is_admin() {
            return Err(ApplicationError::forbidden("only admins may change roles"));
        }
        if (changes.owner_id.is_some() || changes.branch_id.is_some())
            && !(actor.is_admin() || actor.is_manager())
        {
            return Err(ApplicationError::forbidden(
                "only admins or managers may reassign accounts",
            ));
        }

        let updated = self
            .deps
            .account_repository
            .update(id, changes, self.deps.clock.now())
            .await?;
        tracing::info!(account_id = %id, actor_id = %actor.account_id, "account updated");
        Ok(AccountSummary::from(&updated))
    }

    pub async fn delete_user(&self, actor: &Actor, id: AccountId) -> Result<(), ApplicationError> {
        self.delete_user_inner(actor, id)
            .await
            .map_err(|err| err.context("delete_user"))
    }

    async fn delete_user_inner(&self, actor: &Actor, id: AccountId) -> Result<(), ApplicationError> {
        let target = self.authorize(actor, id).await?;
        self.deps
            .account_repository
            .soft_delete(id, self.deps.clock.now())
            .await?;
        tracing::info!(account_id = %id, actor_id = %actor.account_id, "account deleted");

        self.deps
            .email
            .submit(EmailMessage::account_deleted(target.email.as_str()));
        Ok(())
    }

    pub async fn update_account_status(
        &self,
        actor: &Actor,
        id: AccountId,
        status: &str,
    ) -> Result<AccountSummary, ApplicationError> {
        self.update_status_inner(actor, id, status)
            .await
            .map_err(|err| err.context("update_account_status"))
    }

    async fn update_status_inner(
        &self,
        actor: &Actor,
        id: AccountId,
        status: &str,
    ) -> Result<AccountSummary, ApplicationError> {
        let config = self.deps.config.current();
        let status = self.validate_status(&config, status)?;
        let mut target = self.authorize(actor, id).await?;
        if actor.account_id == id && !actor.is_admin() {
            return Err(ApplicationError::forbidden("cannot change own account status"));
        }

        let now = self.deps.clock.now();
        self.deps
            .account_repository
            .update_status(id, status, now)
            .await?;
        tracing::info!(account_id = %id, status = %status, "account status changed");

        target.status = status;
        target.updated_at = now;
        Ok(AccountSummary::from(&target))
    }

    /// 权限检查：本人、管理员、同分店经理
    pub async fn authorize(&self, actor: &Actor, id: AccountId) -> Result<Account, ApplicationError> {
        let target = self.load(id).await?;
        if actor.may_manage(&target) {
            Ok(target)
        } else {
            tracing::warn!(actor_id = %actor.account_id, account_id = %id, "permission denied");
            Err(ApplicationError::forbidden("not permitted to act on this account"))
        }
    }

    async fn load(&self, id: AccountId) -> Result<Account, ApplicationError> {
        self.deps
            .account_repository
            .find_by_id(id)
            .await?
            .ok_or(ApplicationError::UserNotFound)
    }

    fn summaries(&self, accounts: Vec<Account>) -> Vec<AccountSummary> {
        let limit = self.deps.config.current().pagination.hard_limit as usize;
        accounts.iter().take(limit).map(AccountSummary::from).collect()
    }

    fn validate_role(&self, config: &AppConfig, role: &str) -> Result<String, ApplicationError> {
        let role = role.trim().to_ascii_lowercase();
        if config.accounts.is_valid_role(&role) {
            Ok(role)
        } else {
            Err(ApplicationError::validation(
                "role",
                format!("must be one of {}", config.accounts.valid_roles.join(", ")),
            ))
        }
    }

    fn validate_status(
        &self,
        config: &AppConfig,
        status: &str,
    ) -> Result<AccountStatus, ApplicationError> {
        if !config.accounts.is_valid_status(status) {
            return Err(ApplicationError::validation(
                "status",
                format!("must be one of {}", config.accounts.valid_statuses.join(", ")),
            ));
        }
        Ok(status.parse::<AccountStatus>()?)
    }
}
