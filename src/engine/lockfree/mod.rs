//! ### English
//! Lock-free latest-wins primitives shared by the render workers.
//!
//! Scene updates and resizes are state, not events: only the newest value matters, so writers
//! overwrite instead of queueing.
//!
//! ### 中文
//! 渲染 worker 共用的无锁 latest-wins 原语。
//!
//! 场景更新与 resize 是“状态”而不是“事件”：只有最新值有意义，因此写端覆盖而不是排队。
mod coalesced;
mod resize;

pub(crate) use coalesced::CoalescedBox;
pub(crate) use resize::CoalescedResize;
