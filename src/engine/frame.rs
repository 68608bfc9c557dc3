//! ### English
//! CPU-side frames produced by the capture worker and the single-slot handoff to the consumer.
//!
//! The producer never waits for the consumer: a new frame overwrites an undelivered one.
//!
//! ### 中文
//! capture worker 产生的 CPU 侧帧，以及交给消费者的单槽位交接。
//!
//! 生产者从不等待消费者：新帧会覆盖尚未取走的旧帧。

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dpi::PhysicalSize;

/// ### English
/// Pixel layout of `FrameBuffer::pixels`.
///
/// ### 中文
/// `FrameBuffer::pixels` 的像素布局。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// ### English
    /// 4 bytes per pixel, R G B A, tightly packed rows.
    ///
    /// ### 中文
    /// 每像素 4 字节，按 R G B A 排列，行之间无填充。
    Rgba8,
}

/// ### English
/// Which visual row is stored first.
///
/// ### 中文
/// 首先存储的是哪一行（视觉上）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowOrigin {
    TopLeft,
    BottomLeft,
}

/// ### English
/// A finished frame: RGBA8, row-major, top row first.
///
/// Ownership moves to the `FrameSink` on delivery.
///
/// ### 中文
/// 一帧完成的图像：RGBA8、行优先、首行为顶部。
///
/// 交付时所有权转移给 `FrameSink`。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameBuffer {
    size: PhysicalSize<u32>,
    pixels: Vec<u8>,
    seq: u64,
}

impl FrameBuffer {
    /// ### English
    /// Wraps GPU readback data (row 0 = visual bottom) and mirrors it to top-left origin.
    ///
    /// ### 中文
    /// 包装 GPU 回读数据（第 0 行为视觉底部），并垂直镜像为左上角原点。
    pub(crate) fn from_bottom_up(size: PhysicalSize<u32>, mut pixels: Vec<u8>, seq: u64) -> Self {
        debug_assert_eq!(pixels.len(), byte_len(size));
        flip_rows(&mut pixels, size.width as usize * 4, size.height as usize);
        Self { size, pixels, seq }
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    /// ### English
    /// Monotonic sequence number assigned by the producing worker (never `0`).
    ///
    /// ### 中文
    /// 由生产 worker 分配的单调递增序号（永不为 `0`）。
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgba8
    }

    pub fn origin(&self) -> RowOrigin {
        RowOrigin::TopLeft
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// ### English
    /// Row `y` counted from the top.
    ///
    /// ### 中文
    /// 自顶部起第 `y` 行。
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.size.height {
            return None;
        }
        let stride = self.size.width as usize * 4;
        let start = y as usize * stride;
        Some(&self.pixels[start..start + stride])
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.size.width {
            return None;
        }
        let row = self.row(y)?;
        let start = x as usize * 4;
        Some([row[start], row[start + 1], row[start + 2], row[start + 3]])
    }
}

#[inline]
pub(crate) fn byte_len(size: PhysicalSize<u32>) -> usize {
    size.width as usize * size.height as usize * 4
}

/// ### English
/// Mirrors an image vertically in place.
///
/// ### 中文
/// 原地垂直翻转图像。
pub(crate) fn flip_rows(pixels: &mut [u8], stride: usize, height: usize) {
    for y in 0..(height / 2) {
        let top_start = y * stride;
        let bottom_start = (height - y - 1) * stride;
        let (head, tail) = pixels.split_at_mut(bottom_start);
        let top = &mut head[top_start..top_start + stride];
        let bottom = &mut tail[..stride];
        top.swap_with_slice(bottom);
    }
}

/// ### English
/// Consumer of finished frames.
///
/// `publish` must not block on the consumer; `clear` releases any retained frame at teardown.
///
/// ### 中文
/// 已完成帧的消费者。
///
/// `publish` 不得阻塞在消费者上；`clear` 在 teardown 时释放仍持有的帧。
pub trait FrameSink: Send + Sync {
    fn publish(&self, frame: FrameBuffer);
    fn clear(&self);
}

struct SlotInner {
    frame: Option<FrameBuffer>,
    published: u64,
    overwritten: u64,
}

/// ### English
/// Single-producer/single-consumer, overwrite-latest frame slot.
///
/// ### 中文
/// 单生产者/单消费者、覆盖最新值的帧槽位。
pub struct LatestFrameSlot {
    inner: Mutex<SlotInner>,
    ready: Condvar,
}

impl Default for LatestFrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                frame: None,
                published: 0,
                overwritten: 0,
            }),
            ready: Condvar::new(),
        }
    }

    /// ### English
    /// Takes the newest undelivered frame, if any.
    ///
    /// ### 中文
    /// 取出最新的尚未交付的帧（若存在）。
    pub fn take(&self) -> Option<FrameBuffer> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .frame
            .take()
    }

    /// ### English
    /// Blocks the consumer until a frame is available or `timeout` elapses.
    ///
    /// ### 中文
    /// 阻塞消费者，直到有帧可取或 `timeout` 到期。
    pub fn wait_take(&self, timeout: Duration) -> Option<FrameBuffer> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(frame) = inner.frame.take() {
                return Some(frame);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            inner = self
                .ready
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn has_frame(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .frame
            .is_some()
    }

    /// ### English
    /// Total frames ever published into this slot.
    ///
    /// ### 中文
    /// 发布到该槽位的帧总数。
    pub fn published_count(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .published
    }

    /// ### English
    /// Frames replaced before the consumer took them.
    ///
    /// ### 中文
    /// 在消费者取走之前就被覆盖的帧数。
    pub fn overwritten_count(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .overwritten
    }
}

impl FrameSink for LatestFrameSlot {
    fn publish(&self, frame: FrameBuffer) {
        let stale = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.published += 1;
            let stale = inner.frame.replace(frame);
            if stale.is_some() {
                inner.overwritten += 1;
            }
            stale
        };
        self.ready.notify_one();
        drop(stale);
    }

    fn clear(&self) {
        let stale = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .frame
            .take();
        drop(stale);
    }
}
