//! ### English
//! Render-on-demand token: an edge-triggered pending flag plus a generation counter.
//!
//! ### 中文
//! 按需渲染令牌：边沿触发的 pending 标记加上代数计数器。

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

struct Token {
    pending: bool,
    generation: u64,
    stop: bool,
}

/// ### English
/// What woke the worker out of `READY`.
///
/// ### 中文
/// 把 worker 从 `READY` 唤醒的原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Wake {
    Render { generation: u64 },
    Stop,
}

/// ### English
/// At most one pending request: requests made before the worker consumes the flag collapse into
/// one render. A request made while a render runs sets the flag again and yields exactly one more.
///
/// ### 中文
/// 最多一个待处理请求：worker 消费标记之前的多次请求合并为一次渲染。渲染进行中发出的请求会重新置位标记，
/// 并恰好触发一次后续渲染。
pub(crate) struct RenderRequest {
    token: Mutex<Token>,
    wake: Condvar,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            token: Mutex::new(Token {
                pending: false,
                generation: 0,
                stop: false,
            }),
            wake: Condvar::new(),
        }
    }
}

impl RenderRequest {
    fn lock(&self) -> MutexGuard<'_, Token> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// ### English
    /// Sets the pending flag and bumps the generation. Returns `true` if no request was pending.
    ///
    /// ### 中文
    /// 置位 pending 标记并递增代数；若此前没有待处理请求则返回 `true`。
    pub(crate) fn request(&self) -> bool {
        let mut token = self.lock();
        token.generation += 1;
        let edge = !token.pending;
        token.pending = true;
        drop(token);
        if edge {
            self.wake.notify_one();
        }
        edge
    }

    pub(crate) fn stop(&self) {
        self.lock().stop = true;
        self.wake.notify_all();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.lock().stop
    }

    pub(crate) fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// ### English
    /// Parks until a render is requested or stop is set. Stop wins over a pending request.
    ///
    /// ### 中文
    /// 阻塞直到有渲染请求或设置了 stop；stop 优先于待处理请求。
    pub(crate) fn wait(&self) -> Wake {
        let mut token = self.lock();
        loop {
            if token.stop {
                return Wake::Stop;
            }
            if token.pending {
                token.pending = false;
                return Wake::Render {
                    generation: token.generation,
                };
            }
            token = self
                .wake
                .wait(token)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn requests_collapse_until_consumed() {
        let request = RenderRequest::default();
        assert!(request.request());
        assert!(!request.request());
        assert!(!request.request());
        assert_eq!(request.wait(), Wake::Render { generation: 3 });
        assert!(request.request());
        assert_eq!(request.wait(), Wake::Render { generation: 4 });
    }

    #[test]
    fn stop_beats_a_pending_request() {
        let request = RenderRequest::default();
        request.request();
        request.stop();
        request.stop();
        assert_eq!(request.wait(), Wake::Stop);
        assert!(request.is_stopped());
    }

    #[test]
    fn stop_wakes_a_parked_waiter() {
        let request = Arc::new(RenderRequest::default());
        let waiter = {
            let request = request.clone();
            thread::spawn(move || request.wait())
        };
        thread::sleep(Duration::from_millis(20));
        request.stop();
        assert_eq!(waiter.join().unwrap(), Wake::Stop);
    }
}
