//! 协作式控制信号
//!
//! 控制器与后台循环之间只通过一个 `watch` 通道交换停止/暂停/放行信号，
//! 任何等待都按有界间隔轮询该通道，不持有锁。

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, timeout};

/// 控制信号快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Control {
    pub stop: bool,
    /// 请求在下一个案件边界暂停
    pub pause: bool,
    /// 放行计数，每次 resume / continueNext 加一
    pub releases: u64,
}

/// 控制端（由控制器持有）
#[derive(Debug)]
pub struct ControlHandle {
    tx: watch::Sender<Control>,
}

impl ControlHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Control::default());
        Self { tx }
    }

    pub fn probe(&self) -> StopProbe {
        StopProbe {
            rx: self.tx.subscribe(),
        }
    }

    pub fn snapshot(&self) -> Control {
        *self.tx.borrow()
    }

    pub fn request_stop(&self) {
        self.tx.send_modify(|c| c.stop = true);
    }

    pub fn request_pause(&self) {
        self.tx.send_modify(|c| c.pause = true);
    }

    /// 放行一次暂停中的循环
    pub fn release(&self) {
        self.tx.send_modify(|c| {
            c.pause = false;
            c.releases += 1;
        });
    }
}

impl Default for ControlHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// 观察端：供循环、翻页、确认等待使用
#[derive(Debug, Clone)]
pub struct StopProbe {
    rx: watch::Receiver<Control>,
}

/// 暂停等待的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Released(u64),
    Stopped,
}

impl StopProbe {
    /// 永远不会被停止的探针（独立使用引擎时）
    pub fn detached() -> Self {
        let (_tx, rx) = watch::channel(Control::default());
        Self { rx }
    }

    pub fn is_stopped(&self) -> bool {
        self.rx.borrow().stop
    }

    pub fn pause_requested(&self) -> bool {
        self.rx.borrow().pause
    }

    pub fn releases(&self) -> u64 {
        self.rx.borrow().releases
    }

    /// 可被停止信号打断的睡眠；完整睡完返回 true
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_stopped() {
            return false;
        }
        let mut rx = self.rx.clone();
        tokio::select! {
            _ = sleep(duration) => true,
            stopped = async { rx.wait_for(|c| c.stop).await.is_ok() } => {
                if stopped {
                    false
                } else {
                    // 控制端已丢弃，不会再有停止信号
                    sleep(duration).await;
                    true
                }
            }
        }
    }

    /// 等待放行计数超过 `seen`，按 `poll` 间隔复查停止信号
    pub async fn wait_for_release(&self, seen: u64, poll: Duration) -> WaitOutcome {
        let mut rx = self.rx.clone();
        loop {
            {
                let control = *rx.borrow_and_update();
                if control.stop {
                    return WaitOutcome::Stopped;
                }
                if control.releases > seen {
                    return WaitOutcome::Released(control.releases);
                }
            }
            match timeout(poll, rx.changed()).await {
                Ok(Ok(())) | Err(_) => continue,
                Ok(Err(_)) => return WaitOutcome::Stopped,
            }
        }
    }
}
