//! 业务规则验证
//!
//! 密码强度策略：长度区间与可选的复杂度要求。

use crate::errors::{DomainError, DomainResult};

/// bcrypt 只使用前 72 字节，超出部分无法参与校验
pub const MAX_PASSWORD_BYTES: usize = 72;

/// 密码强度策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_numbers: bool,
    pub require_special_chars: bool,
    pub special_chars: String,
}

impl PasswordPolicy {
    /// 返回所有未满足的要求
    pub fn unmet_requirements(&self, password: &str) -> Vec<String> {
        let mut unmet = Vec::new();
        let length = password.chars().count();

        if length < self.min_length {
            unmet.push(format!("at least {} characters", self.min_length));
        }
        if length > self.max_length {
            unmet.push(format!("at most {} characters", self.max_length));
        }
        // 多字节字符按字节计
        if password.len() > MAX_PASSWORD_BYTES {
            unmet.push(format!("at most {MAX_PASSWORD_BYTES} bytes"));
        }
        if self.require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
            unmet.push("an uppercase letter".to_string());
        }
        if self.require_lowercase && !password.chars().any(|c| c.is_lowercase()) {
            unmet.push("a lowercase letter".to_string());
        }
        if self.require_numbers && !password.chars().any(|c| c.is_ascii_digit()) {
            unmet.push("a digit".to_string());
        }
        if self.require_special_chars && !password.chars().any(|c| self.special_chars.contains(c)) {
            unmet.push(format!("a special character from {}", self.special_chars));
        }
        unmet
    }

    pub fn check(&self, password: &str) -> DomainResult<()> {
        let unmet = self.unmet_requirements(password);
        if unmet.is_empty() {
            Ok(())
        } else {
            Err(DomainError::WeakPassword { unmet })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PasswordPolicy {
        PasswordPolicy {
            min_length: 8,
            max_length: 72,
            require_uppercase: true,
            require_lowercase: true,
            require_numbers: true,
            require_special_chars: true,
            special_chars: "!@#$%^&*()_+-=[]{}|;:,.<>?/".into(),
        }
    }

    #[test]
    fn test_strong_passwords_accepted() {
        assert!(policy().check("Passw0rd!").is_ok());
        assert!(policy().check("NewPa$$1A").is_ok());
    }

    #[test]
    fn test_every_unmet_requirement_reported() {
        let unmet = policy().unmet_requirements("abc");
        assert_eq!(unmet.len(), 4);
        assert!(unmet.iter().any(|r| r.contains("at least 8")));
        assert!(unmet.iter().any(|r| r.contains("uppercase")));
        assert!(unmet.iter().any(|r| r.contains("digit")));
        assert!(unmet.iter().any(|r| r.contains("special")));
    }

    #[test]
    fn test_complexity_can_be_disabled() {
        let mut relaxed = policy();
        relaxed.require_uppercase = false;
        relaxed.require_numbers = false;
        relaxed.require_special_chars = false;
        assert!(relaxed.check("lowercaseonly").is_ok());
        assert!(relaxed.check(&"a".repeat(73)).is_err());
    }

    #[test]
    fn test_byte_limit_counts_multibyte_characters() {
        // 47 个字符，UTF-8 编码为 90 字节
        let password = format!("Aa1!{}", "é".repeat(43));
        assert!(password.chars().count() <= 72);
        assert!(password.len() > MAX_PASSWORD_BYTES);

        let unmet = policy().unmet_requirements(&password);
        assert_eq!(unmet, vec![format!("at most {MAX_PASSWORD_BYTES} bytes")]);
    }
}
