//! 规则目录监听
//!
//! 使用 `notify` 监听规则目录，规则文件写入后经去抖窗口合并为一次重载信号。

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;

/// 规则目录监听器
///
/// drop 时停止监听，对应的重载信号通道随之关闭。
pub struct RuleDirWatcher {
    _watcher: RecommendedWatcher,
    dir: PathBuf,
}

impl RuleDirWatcher {
    /// 开始监听目录，返回监听器与去抖后的重载信号
    ///
    /// 只有文件名以 `suffix` 结尾的文件变化才会触发重载。必须在 tokio 运行时内调用。
    pub fn start(
        dir: impl AsRef<Path>,
        suffix: &str,
        debounce: Duration,
    ) -> Result<(Self, mpsc::Receiver<()>)> {
        let dir = dir.as_ref().to_path_buf();
        let suffix = suffix.to_string();

        let (event_tx, mut event_rx) = mpsc::channel::<()>(16);
        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    let relevant = matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) && event.paths.iter().any(|path| is_rule_file(path, &suffix));
                    if relevant {
                        // 通道满说明已有待处理的重载，丢弃即可
                        let _ = event_tx.try_send(());
                    }
                }
                Err(e) => warn!(error = %e, "规则目录监听事件错误"),
            },
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(path = %dir.display(), "规则目录监听已启动");

        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        tokio::spawn(async move {
            while event_rx.recv().await.is_some() {
                tokio::time::sleep(debounce).await;
                // 合并去抖窗口内的后续事件
                while event_rx.try_recv().is_ok() {}

                debug!("规则文件变化，发送重载信号");
                if trigger_tx.send(()).await.is_err() {
                    break;
                }
            }
            debug!("规则目录监听任务已退出");
        });

        Ok((
            Self {
                _watcher: watcher,
                dir,
            },
            trigger_rx,
        ))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn is_rule_file(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(suffix))
}
