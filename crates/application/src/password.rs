use async_trait::async_trait;
use domain::PasswordHash;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordHasherError {
    /// 无法按配置的代价计算哈希
    #[error("hash computation failed: {0}")]
    HashComputation(String),
    #[error("verify error: {0}")]
    Verify(String),
    /// 明文超出算法可处理的字节数
    #[error("password exceeds {max_bytes} bytes")]
    TooLong { max_bytes: usize },
}

impl PasswordHasherError {
    pub fn hash_error(message: impl Into<String>) -> Self {
        Self::HashComputation(message.into())
    }

    pub fn verify_error(message: impl Into<String>) -> Self {
        Self::Verify(message.into())
    }
}

/// 密码哈希端口。实现应把 CPU 密集的计算放到阻塞线程池，且不持有任何共享锁。
#[async_trait]
pub trait PasswordHasher: Send + Sync {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError>;

    /// 不匹配返回 `Ok(false)`，而不是错误
    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError>;
}
