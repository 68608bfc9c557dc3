use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// ### English
/// Coalesced pointer to a boxed payload (latest-wins), with a single-node free cache so repeated
/// scene updates do not allocate on every write.
///
/// - Multi-producer friendly: writers use an atomic swap.
/// - A pending value is replaced, never queued: intermediate values are dropped.
///
/// ### 中文
/// “只保留最新值（latest-wins）”的 `Box<T>` 原子交换槽，带一个单节点 free cache，避免每次场景更新都分配内存。
///
/// - 支持多生产者：写端使用原子 swap。
/// - 待处理值只会被替换而不会排队：中间值直接丢弃。
pub(crate) struct CoalescedBox<T> {
    ptr: AtomicPtr<T>,
    free: AtomicPtr<T>,
}

unsafe impl<T: Send> Send for CoalescedBox<T> {}
unsafe impl<T: Send> Sync for CoalescedBox<T> {}

impl<T> Default for CoalescedBox<T> {
    fn default() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
            free: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

impl<T> CoalescedBox<T> {
    #[inline]
    fn replace(&self, node: Box<T>) -> Option<Box<T>> {
        let new_ptr = Box::into_raw(node);
        let old_ptr = self.ptr.swap(new_ptr, Ordering::AcqRel);
        if old_ptr.is_null() {
            None
        } else {
            Some(unsafe { Box::from_raw(old_ptr) })
        }
    }

    #[inline]
    fn take(&self) -> Option<Box<T>> {
        let ptr = self.ptr.swap(ptr::null_mut(), Ordering::AcqRel);
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { Box::from_raw(ptr) })
        }
    }

    #[inline]
    fn pop_free(&self) -> Option<Box<T>> {
        let ptr = self.free.swap(ptr::null_mut(), Ordering::AcqRel);
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { Box::from_raw(ptr) })
        }
    }

    #[inline]
    fn push_free(&self, node: Box<T>) {
        let new_ptr = Box::into_raw(node);
        let old_ptr = self.free.swap(new_ptr, Ordering::AcqRel);
        if !old_ptr.is_null() {
            unsafe {
                drop(Box::from_raw(old_ptr));
            }
        }
    }

    /// ### English
    /// Publishes `value` as the pending one, replacing (and recycling) any older pending value.
    ///
    /// Returns `true` if nothing was pending before this call.
    ///
    /// ### 中文
    /// 把 `value` 发布为待处理值，替换（并回收）更早的待处理值。
    ///
    /// 若调用前没有待处理值则返回 `true`。
    pub(crate) fn store(&self, value: T) -> bool {
        let node = match self.pop_free() {
            Some(mut node) => {
                *node = value;
                node
            }
            None => Box::new(value),
        };
        match self.replace(node) {
            Some(stale) => {
                self.push_free(stale);
                false
            }
            None => true,
        }
    }
}

impl<T: Copy> CoalescedBox<T> {
    /// ### English
    /// Takes the latest pending value, returning its node to the free cache.
    ///
    /// ### 中文
    /// 取出最新的待处理值，并把节点归还到 free cache。
    pub(crate) fn take_latest(&self) -> Option<T> {
        let node = self.take()?;
        let value = *node;
        self.push_free(node);
        Some(value)
    }
}

impl<T> Drop for CoalescedBox<T> {
    fn drop(&mut self) {
        let current = self.ptr.swap(ptr::null_mut(), Ordering::AcqRel);
        if !current.is_null() {
            unsafe {
                drop(Box::from_raw(current));
            }
        }

        let free = self.free.swap(ptr::null_mut(), Ordering::AcqRel);
        if !free.is_null() {
            unsafe {
                drop(Box::from_raw(free));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_value_wins() {
        let slot = CoalescedBox::<u32>::default();
        assert_eq!(slot.take_latest(), None);
        assert!(slot.store(1));
        assert!(!slot.store(2));
        assert!(!slot.store(3));
        assert_eq!(slot.take_latest(), Some(3));
        assert_eq!(slot.take_latest(), None);
        assert!(slot.store(4));
    }

    #[test]
    fn concurrent_writers_leave_one_of_their_values() {
        let slot = std::sync::Arc::new(CoalescedBox::<u64>::default());
        let writers: Vec<_> = (0..4u64)
            .map(|w| {
                let slot = slot.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        slot.store(w * 10_000 + i);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        let value = slot.take_latest().unwrap();
        assert_eq!(value % 10_000, 999);
        assert!(slot.take_latest().is_none());
    }
}
