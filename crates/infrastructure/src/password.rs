use application::{password::PasswordHasherError, PasswordHasher};
use async_trait::async_trait;
use bcrypt::{hash, verify};
use config::ConfigHandle;
use domain::{PasswordHash, MAX_PASSWORD_BYTES};

/// bcrypt 哈希，计算放到阻塞线程池，不占用异步工作线程。
///
/// bcrypt 会静默截断 72 字节之后的输入，所以超长明文在进入 bcrypt 前拦下：
/// 哈希时报 `TooLong`，校验时视为不匹配。
#[derive(Clone)]
pub struct BcryptPasswordHasher {
    config: ConfigHandle,
}

impl BcryptPasswordHasher {
    /// 成本因子在每次哈希时从当前配置读取
    pub fn new(config: ConfigHandle) -> Self {
        Self { config }
    }
}

fn too_long() -> PasswordHasherError {
    PasswordHasherError::TooLong {
        max_bytes: MAX_PASSWORD_BYTES,
    }
}

#[async_trait]
impl PasswordHasher for BcryptPasswordHasher {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError> {
        if plaintext.len() > MAX_PASSWORD_BYTES {
            return Err(too_long());
        }
        let cost = self.config.current().password.bcrypt_cost;
        let plaintext = plaintext.to_owned();
        let hashed = tokio::task::spawn_blocking(move || hash(plaintext, cost))
            .await
            .map_err(|err| PasswordHasherError::hash_error(err.to_string()))?
            .map_err(|err| PasswordHasherError::hash_error(err.to_string()))?;

        PasswordHash::new(hashed).map_err(|err| PasswordHasherError::hash_error(err.to_string()))
    }

    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError> {
        // 存储的哈希不可能来自超长明文
        if plaintext.len() > MAX_PASSWORD_BYTES {
            return Ok(false);
        }
        let plaintext = plaintext.to_owned();
        let hashed = hashed.as_str().to_owned();
        tokio::task::spawn_blocking(move || verify(plaintext, &hashed))
            .await
            .map_err(|err| PasswordHasherError::verify_error(err.to_string()))?
            .map_err(|err| PasswordHasherError::verify_error(err.to_string()))
    }
}
