//! 配置文件监听
//!
//! 文件变化时重新加载（环境变量依旧生效）并通过 [`ConfigHandle::replace`] 替换；
//! 新配置无效时保留当前配置。

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::{AppConfig, ConfigError, ConfigHandle};

/// 监听配置文件，返回的 watcher 被丢弃时停止监听
pub fn watch_config_file(
    path: impl AsRef<Path>,
    handle: ConfigHandle,
) -> Result<RecommendedWatcher, ConfigError> {
    let path: PathBuf = path.as_ref().to_path_buf();
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) => {
            let _ = tx.send(());
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(error = %err, "config watcher error"),
    })?;
    watcher.watch(&path, RecursiveMode::NonRecursive)?;

    tracing::info!(path = %path.display(), "config file watcher started");

    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            // 编辑器保存时往往连续触发多个事件，合并处理
            while rx.try_recv().is_ok() {}

            match AppConfig::load_from(Some(&path)).and_then(|cfg| handle.replace(cfg)) {
                Ok(()) => tracing::info!(path = %path.display(), "config reloaded"),
                Err(err) => {
                    tracing::warn!(error = %err, "config reload failed, keeping current config")
                }
            }
        }
    });

    Ok(watcher)
}
