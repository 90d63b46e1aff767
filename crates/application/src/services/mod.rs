mod account_service;
mod credential_service;

#[cfg(test)]
mod credential_service_tests;
#[cfg(test)]
mod test_support;

pub use account_service::{
    AccountService, AccountServiceDependencies, CreateAccountRequest, SearchAccountsRequest,
    UpdateAccountRequest,
};
pub use credential_service::{
    ChangePasswordRequest, CredentialService, CredentialServiceDependencies, LoginRequest,
    RegisterRequest,
};

use config::AppConfig;
use domain::PasswordPolicy;

/// 每次调用时从当前配置构造密码策略
pub(crate) fn password_policy(config: &AppConfig) -> PasswordPolicy {
    let p = &config.password;
    PasswordPolicy {
        min_length: p.min_length,
        max_length: p.max_length,
        require_uppercase: p.require_uppercase,
        require_lowercase: p.require_lowercase,
        require_numbers: p.require_numbers,
        require_special_chars: p.require_special_chars,
        special_chars: p.special_chars.clone(),
    }
}
