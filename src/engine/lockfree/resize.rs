use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use dpi::PhysicalSize;

#[repr(C, align(64))]
/// ### English
/// Coalesced resize state: keeps only the latest `(width, height)` until the worker thread drains
/// it at the top of its next render iteration.
///
/// ### 中文
/// resize 合并状态：只保留最新的 `(width, height)`，等待 worker 线程在下一次渲染迭代开始时 drain。
pub(crate) struct CoalescedResize {
    /// ### English
    /// Pending flag (`0` = no pending resize, `1` = pending).
    ///
    /// ### 中文
    /// pending 标记（`0` = 无待处理 resize，`1` = 有待处理 resize）。
    pending: AtomicU8,
    _padding: [u8; 7],
    /// ### English
    /// Packed `(width, height)` as two `u32` values.
    ///
    /// ### 中文
    /// 将 `(width, height)` 以两个 `u32` 打包到一个 `u64` 中。
    packed_size: AtomicU64,
}

impl Default for CoalescedResize {
    fn default() -> Self {
        Self {
            pending: AtomicU8::new(0),
            _padding: [0; 7],
            packed_size: AtomicU64::new(0),
        }
    }
}

impl CoalescedResize {
    /// ### English
    /// Stores the latest size and marks it pending.
    /// Returns `true` if this call transitions from "not pending" to "pending".
    ///
    /// ### 中文
    /// 写入最新尺寸并标记为 pending。
    /// 若本次调用把状态从“非 pending”切换为“pending”，则返回 `true`。
    pub(crate) fn set(&self, size: PhysicalSize<u32>) -> bool {
        self.packed_size
            .store(pack_u32x2(size.width, size.height), Ordering::Relaxed);
        self.pending.swap(1, Ordering::AcqRel) == 0
    }

    /// ### English
    /// Takes the latest size if pending.
    ///
    /// ### 中文
    /// 若处于 pending，则取出最新尺寸。
    pub(crate) fn take(&self) -> Option<PhysicalSize<u32>> {
        if self.pending.swap(0, Ordering::AcqRel) == 0 {
            return None;
        }
        let packed = self.packed_size.load(Ordering::Relaxed);
        let (width, height) = unpack_u32x2(packed);
        Some(PhysicalSize::new(width, height))
    }
}

#[inline]
fn pack_u32x2(width: u32, height: u32) -> u64 {
    (width as u64) | ((height as u64) << 32)
}

#[inline]
fn unpack_u32x2(packed: u64) -> (u32, u32) {
    (packed as u32, (packed >> 32) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_latest_size() {
        let resize = CoalescedResize::default();
        assert_eq!(resize.take(), None);
        assert!(resize.set(PhysicalSize::new(10, 20)));
        assert!(!resize.set(PhysicalSize::new(640, 480)));
        assert_eq!(resize.take(), Some(PhysicalSize::new(640, 480)));
        assert_eq!(resize.take(), None);
    }
}
