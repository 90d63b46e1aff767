//! 可热更新的配置句柄
//!
//! 读操作无锁（`ArcSwap::load_full`），更新时先校验再原子替换指针，
//! 替换完成后依次调用已注册的变更回调。当前配置永远不会被原地修改。

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use crate::{AppConfig, ConfigError};

type ChangeCallback = Box<dyn Fn(&AppConfig) + Send + Sync>;

/// 全局配置访问入口，克隆后共享同一份配置
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<ArcSwap<AppConfig>>,
    callbacks: Arc<Mutex<Vec<ChangeCallback>>>,
}

impl ConfigHandle {
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
            callbacks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 当前配置快照；调用方不应长期持有，每次操作重新读取
    pub fn current(&self) -> Arc<AppConfig> {
        self.inner.load_full()
    }

    /// 校验并替换配置，成功后触发变更回调
    pub fn replace(&self, config: AppConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let config = Arc::new(config);
        self.inner.store(Arc::clone(&config));

        let callbacks = match self.callbacks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for callback in callbacks.iter() {
            callback(&config);
        }
        tracing::info!("configuration replaced");
        Ok(())
    }

    /// 注册配置变更回调
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(&AppConfig) + Send + Sync + 'static,
    {
        let mut callbacks = match self.callbacks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        callbacks.push(Box::new(callback));
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(AppConfig::default())
    }
}

impl std::fmt::Debug for ConfigHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigHandle")
            .field("config", &self.current().sanitize())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_replace_swaps_pointer_and_notifies() {
        let handle = ConfigHandle::default();
        let before = handle.current();
        let seen = Arc::new(AtomicU32::new(0));

        let observer = Arc::clone(&seen);
        handle.on_change(move |cfg| {
            observer.store(cfg.security.max_login_attempts, Ordering::SeqCst);
        });

        let mut next = AppConfig::default();
        next.security.max_login_attempts = 9;
        handle.replace(next).expect("valid config");

        assert_eq!(handle.current().security.max_login_attempts, 9);
        assert_eq!(seen.load(Ordering::SeqCst), 9);
        // 旧快照保持不变
        assert_eq!(before.security.max_login_attempts, 5);
    }

    #[test]
    fn test_invalid_replacement_keeps_current() {
        let handle = ConfigHandle::default();
        let mut next = AppConfig::default();
        next.jwt.secret_key = "short".into();

        assert!(handle.replace(next).is_err());
        assert_eq!(handle.current().jwt.secret_key, AppConfig::default().jwt.secret_key);
    }
}
