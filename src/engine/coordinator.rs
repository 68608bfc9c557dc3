//! ### English
//! Start-order handshake between the surface worker (share-group origin) and the capture worker.
//!
//! The surface worker publishes its context handle together with the GPU objects it created; the
//! engine blocks on `await_shared_context` before it lets the capture worker create its context.
//!
//! ### 中文
//! surface worker（共享组源）与 capture worker 之间的启动顺序握手。
//!
//! surface worker 发布其上下文句柄以及它创建的 GPU 对象；引擎在允许 capture worker 创建上下文之前，
//! 会阻塞在 `await_shared_context` 上。

use std::collections::HashMap;
use std::sync::{
    Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::{Duration, Instant};

use log::debug;

use super::error::{ResourceError, Result};
use super::gpu::{BufferId, GpuContextHandle, ProgramId, TextureId};
use super::scene::ResourceId;

/// ### English
/// GPU objects created by the origin context. Read-only for every other context of the group.
///
/// ### 中文
/// 源上下文创建的 GPU 对象；对共享组内其它上下文只读。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SharedObjects {
    pub program: ProgramId,
    pub vertices: BufferId,
    pub textures: HashMap<ResourceId, TextureId>,
}

impl SharedObjects {
    pub fn texture(&self, id: ResourceId) -> Option<TextureId> {
        self.textures.get(&id).copied()
    }
}

/// ### English
/// Access gate for the origin context itself.
///
/// A dependent holds it shared while it creates its context from the published handle. The origin
/// worker holds it exclusively whenever it mutates that context (render, resize, teardown).
///
/// ### 中文
/// 源上下文本身的访问闸门。
///
/// 依赖方在用已发布的句柄创建上下文期间以共享方式持有；源 worker 在修改该上下文（渲染、resize、
/// 销毁）时以独占方式持有。
#[derive(Debug, Default)]
pub struct OriginLock(RwLock<()>);

impl OriginLock {
    pub(crate) fn share(&self) -> RwLockReadGuard<'_, ()> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// ### English
/// What the origin publishes: its handle plus the objects a dependent context may draw with.
///
/// ### 中文
/// 源上下文发布的内容：其句柄以及依赖上下文可用于绘制的对象。
#[derive(Clone, Debug)]
pub struct SharedScene {
    pub handle: GpuContextHandle,
    pub objects: Arc<SharedObjects>,
    pub origin: Arc<OriginLock>,
}

enum ShareSlot {
    Pending,
    Published(SharedScene),
    Abandoned(ResourceError),
}

/// ### English
/// One-shot publication slot guarded by a mutex/condition pair.
///
/// ### 中文
/// 由互斥锁/条件变量保护的一次性发布槽位。
pub struct ShareCoordinator {
    slot: Mutex<ShareSlot>,
    changed: Condvar,
    origin: Arc<OriginLock>,
}

impl Default for ShareCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShareCoordinator {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(ShareSlot::Pending),
            changed: Condvar::new(),
            origin: Arc::new(OriginLock::default()),
        }
    }

    pub fn origin(&self) -> &Arc<OriginLock> {
        &self.origin
    }

    fn lock(&self) -> MutexGuard<'_, ShareSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// ### English
    /// Publishes the origin's shared scene and wakes the waiter. Only the first outcome counts.
    ///
    /// ### 中文
    /// 发布源上下文的共享场景并唤醒等待者；只有第一次结果生效。
    pub fn publish(&self, scene: SharedScene) {
        let mut slot = self.lock();
        if !matches!(*slot, ShareSlot::Pending) {
            return;
        }
        debug!(
            "shared context {} published (share group {})",
            scene.handle.context_id, scene.handle.share_group_id
        );
        *slot = ShareSlot::Published(scene);
        drop(slot);
        self.changed.notify_all();
    }

    /// ### English
    /// Records that the origin will never publish, so waiters fail fast with `reason`.
    ///
    /// ### 中文
    /// 记录源上下文永远不会发布，使等待者以 `reason` 立即失败。
    pub fn abandon(&self, reason: ResourceError) {
        let mut slot = self.lock();
        if !matches!(*slot, ShareSlot::Pending) {
            return;
        }
        *slot = ShareSlot::Abandoned(reason);
        drop(slot);
        self.changed.notify_all();
    }

    pub fn is_published(&self) -> bool {
        matches!(*self.lock(), ShareSlot::Published(_))
    }

    /// ### English
    /// Blocks until the origin published (or gave up), at most `timeout`.
    ///
    /// ### 中文
    /// 阻塞直到源上下文发布（或放弃），最多等待 `timeout`。
    pub fn await_shared_context(&self, timeout: Duration) -> Result<SharedScene> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            match &*slot {
                ShareSlot::Published(scene) => return Ok(scene.clone()),
                ShareSlot::Abandoned(reason) => return Err(reason.clone()),
                ShareSlot::Pending => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ResourceError::ShareTimeout(timeout));
            }
            slot = self
                .changed
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn scene() -> SharedScene {
        SharedScene {
            handle: GpuContextHandle::new(1, 1, 1, (3, 0), 0),
            objects: Arc::new(SharedObjects::default()),
            origin: Arc::new(OriginLock::default()),
        }
    }

    #[test]
    fn waiting_without_a_publisher_times_out() {
        let coordinator = ShareCoordinator::new();
        let timeout = Duration::from_millis(30);
        let started = Instant::now();
        assert_eq!(
            coordinator.await_shared_context(timeout).map(|s| s.handle),
            Err(ResourceError::ShareTimeout(timeout))
        );
        assert!(started.elapsed() >= timeout);
    }

    #[test]
    fn publish_wakes_the_waiter() {
        let coordinator = Arc::new(ShareCoordinator::new());
        let publisher = {
            let coordinator = coordinator.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                coordinator.publish(scene());
            })
        };
        let shared = coordinator
            .await_shared_context(Duration::from_secs(5))
            .unwrap();
        publisher.join().unwrap();
        assert_eq!(shared.handle.context_id, 1);
        assert!(coordinator.is_published());
    }

    #[test]
    fn abandon_fails_fast_and_first_outcome_sticks() {
        let coordinator = ShareCoordinator::new();
        coordinator.abandon(ResourceError::ProgramLinkFailed("boom".to_string()));
        coordinator.publish(scene());
        assert!(!coordinator.is_published());
        assert!(matches!(
            coordinator.await_shared_context(Duration::from_secs(5)),
            Err(ResourceError::ProgramLinkFailed(_))
        ));
    }
}
