//! ### English
//! Per-worker count of outstanding GPU objects (leak probe).
//!
//! ### 中文
//! 每个 worker 尚未释放的 GPU 对象计数（泄漏探针）。

use std::fmt;
use std::ops::Add;
use std::sync::atomic::{AtomicI64, Ordering};

use log::error;

/// ### English
/// Kinds of GPU objects a worker creates and must destroy.
///
/// ### 中文
/// worker 会创建并且必须销毁的 GPU 对象种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GpuObjectKind {
    Context,
    WindowSurface,
    Texture,
    Renderbuffer,
    Framebuffer,
    Shader,
    Program,
    Buffer,
}

const KIND_COUNT: usize = 8;

impl GpuObjectKind {
    pub const ALL: [Self; KIND_COUNT] = [
        Self::Context,
        Self::WindowSurface,
        Self::Texture,
        Self::Renderbuffer,
        Self::Framebuffer,
        Self::Shader,
        Self::Program,
        Self::Buffer,
    ];

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for GpuObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Context => "context",
            Self::WindowSurface => "window surface",
            Self::Texture => "texture",
            Self::Renderbuffer => "renderbuffer",
            Self::Framebuffer => "framebuffer",
            Self::Shader => "shader",
            Self::Program => "program",
            Self::Buffer => "buffer",
        };
        f.write_str(name)
    }
}

/// ### English
/// Lock-free counters updated by the owning worker thread and read from any thread.
///
/// ### 中文
/// 由所属 worker 线程更新、可在任意线程读取的无锁计数器。
pub struct ResourceLedger {
    counts: [AtomicI64; KIND_COUNT],
}

impl Default for ResourceLedger {
    fn default() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicI64::new(0)),
        }
    }
}

impl ResourceLedger {
    /// ### English
    /// Records one successfully created object.
    ///
    /// ### 中文
    /// 记录一个创建成功的对象。
    #[inline]
    pub fn track(&self, kind: GpuObjectKind) {
        self.counts[kind.index()].fetch_add(1, Ordering::AcqRel);
    }

    /// ### English
    /// Records one destroyed object. Going below zero means a double destroy and is logged.
    ///
    /// ### 中文
    /// 记录一个已销毁的对象。计数变为负数意味着重复销毁，会记录错误日志。
    #[inline]
    pub fn release(&self, kind: GpuObjectKind) {
        let prev = self.counts[kind.index()].fetch_sub(1, Ordering::AcqRel);
        if prev <= 0 {
            error!("{kind} destroyed more times than it was created");
        }
    }

    pub fn snapshot(&self) -> ResourceCounts {
        ResourceCounts {
            counts: std::array::from_fn(|i| self.counts[i].load(Ordering::Acquire)),
        }
    }
}

/// ### English
/// Point-in-time snapshot of a ledger.
///
/// ### 中文
/// ledger 在某一时刻的快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    counts: [i64; KIND_COUNT],
}

impl ResourceCounts {
    pub fn get(&self, kind: GpuObjectKind) -> i64 {
        self.counts[kind.index()]
    }

    pub fn total(&self) -> i64 {
        self.counts.iter().sum()
    }

    /// ### English
    /// `true` when nothing created by the worker is still alive.
    ///
    /// ### 中文
    /// 当 worker 创建的对象全部已释放时返回 `true`。
    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|&c| c == 0)
    }
}

impl Add for ResourceCounts {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            counts: std::array::from_fn(|i| self.counts[i] + rhs.counts[i]),
        }
    }
}

impl fmt::Display for ResourceCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for kind in GpuObjectKind::ALL {
            let count = self.get(kind);
            if count == 0 {
                continue;
            }
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{kind}: {count}")?;
            first = false;
        }
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}
