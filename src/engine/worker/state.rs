//! ### English
//! Worker lifecycle state guarded by a mutex/condition pair.
//!
//! ### 中文
//! 由互斥锁/条件变量保护的 worker 生命周期状态。

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// ### English
/// `Unstarted → Initializing → Ready ⇄ Rendering → Stopping → Stopped`.
///
/// Any initialization failure goes straight to `Stopping`.
///
/// ### 中文
/// `Unstarted → Initializing → Ready ⇄ Rendering → Stopping → Stopped`。
///
/// 任何初始化失败都会直接进入 `Stopping`。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Unstarted,
    Initializing,
    Ready,
    Rendering,
    Stopping,
    Stopped,
}

impl WorkerState {
    /// ### English
    /// `true` while the worker thread owns live GPU state.
    ///
    /// ### 中文
    /// 当 worker 线程持有活跃的 GPU 状态时为 `true`。
    pub fn is_running(self) -> bool {
        matches!(self, Self::Initializing | Self::Ready | Self::Rendering)
    }

    fn allows(self, next: Self) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Unstarted, Initializing | Stopped)
                | (Initializing, Ready | Stopping)
                | (Ready, Rendering | Stopping)
                | (Rendering, Ready | Stopping)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unstarted => "UNSTARTED",
            Self::Initializing => "INITIALIZING",
            Self::Ready => "READY",
            Self::Rendering => "RENDERING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

pub(crate) struct StateCell {
    state: Mutex<WorkerState>,
    changed: Condvar,
}

impl Default for StateCell {
    fn default() -> Self {
        Self {
            state: Mutex::new(WorkerState::Unstarted),
            changed: Condvar::new(),
        }
    }
}

impl StateCell {
    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get(&self) -> WorkerState {
        *self.lock()
    }

    /// ### English
    /// Moves to `next` if the lifecycle allows it. Once stopping, the worker never goes back to
    /// `Ready`/`Rendering`, so a refused transition tells the worker thread to wind down.
    ///
    /// ### 中文
    /// 若生命周期允许则切换到 `next`。一旦进入 stopping，worker 不会再回到 `Ready`/`Rendering`，
    /// 因此转换被拒绝即表示 worker 线程应当收尾。
    pub(crate) fn advance(&self, next: WorkerState) -> bool {
        let mut state = self.lock();
        if *state == next {
            return true;
        }
        if !state.allows(next) {
            return false;
        }
        *state = next;
        drop(state);
        self.changed.notify_all();
        true
    }

    /// ### English
    /// Blocks until `done(state)` holds or `timeout` elapses; returns the last observed state.
    ///
    /// ### 中文
    /// 阻塞直到 `done(state)` 成立或 `timeout` 到期；返回最后观察到的状态。
    pub(crate) fn wait_until(
        &self,
        timeout: Duration,
        done: impl Fn(WorkerState) -> bool,
    ) -> WorkerState {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !done(*state) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *state
    }
}
