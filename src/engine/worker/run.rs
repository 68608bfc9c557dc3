//! ### English
//! Body of a worker thread: init, render-on-demand loop, order-safe teardown.
//!
//! ### 中文
//! worker 线程主体：初始化、按需渲染循环、顺序安全的 teardown。

use std::sync::Arc;
use std::sync::atomic::Ordering;

use crossbeam_channel::Sender;
use log::{debug, error, info, warn};

use crate::engine::coordinator::OriginLock;
use crate::engine::error::{ResourceError, Result};
use crate::engine::gpu::{GpuBackend, GpuContext};
use crate::engine::ledger::GpuObjectKind;

use super::WorkerShared;
use super::request::Wake;
use super::role::WorkerRole;
use super::state::WorkerState;

pub(super) fn worker_main<B: GpuBackend>(
    shared: Arc<WorkerShared>,
    backend: Arc<B>,
    mut role: Box<dyn WorkerRole<B>>,
    init_tx: Sender<Result<()>>,
) {
    let kind = shared.kind;

    if shared.request.is_stopped() {
        info!("{kind} worker stopped before initializing");
        role.abandon(&ResourceError::WorkerStopped);
        let _ = init_tx.send(Err(ResourceError::WorkerStopped));
        shared.state.advance(WorkerState::Stopping);
        shared.state.advance(WorkerState::Stopped);
        return;
    }

    let mut context = match role.create_context(&backend) {
        Ok(context) => context,
        Err(err) => {
            error!("{kind} worker failed to create its context: {err}");
            fail_init(&shared, role.as_mut(), &init_tx, err);
            shared.state.advance(WorkerState::Stopped);
            return;
        }
    };
    shared.ledger.track(GpuObjectKind::Context);

    let initialized = context
        .make_current()
        .and_then(|()| role.init(&mut context, &shared.ledger));

    match initialized {
        Err(err) => {
            error!("{kind} worker failed to initialize: {err}");
            fail_init(&shared, role.as_mut(), &init_tx, err);
        }
        Ok(()) if shared.request.is_stopped() || !shared.state.advance(WorkerState::Ready) => {
            warn!("{kind} worker stop requested while initializing");
            role.abandon(&ResourceError::WorkerStopped);
            let _ = init_tx.send(Err(ResourceError::WorkerStopped));
            shared.state.advance(WorkerState::Stopping);
        }
        Ok(()) => {
            info!("{kind} worker READY ({})", backend.name());
            let _ = init_tx.send(Ok(()));
            drop(init_tx);
            render_loop(&shared, &mut context, role.as_mut());
            shared.state.advance(WorkerState::Stopping);
        }
    }

    teardown(&shared, context, role.as_mut());
}

fn fail_init<B: GpuBackend>(
    shared: &WorkerShared,
    role: &mut dyn WorkerRole<B>,
    init_tx: &Sender<Result<()>>,
    err: ResourceError,
) {
    shared.record_error(err.clone());
    shared.state.advance(WorkerState::Stopping);
    role.abandon(&err);
    let _ = init_tx.send(Err(err));
}

fn render_loop<B: GpuBackend>(
    shared: &WorkerShared,
    context: &mut B::Context,
    role: &mut dyn WorkerRole<B>,
) {
    let kind = shared.kind;
    let origin = role.origin();
    let mut scene = shared.scene.take_latest().unwrap_or_default();

    loop {
        let generation = match shared.request.wait() {
            Wake::Stop => break,
            Wake::Render { generation } => generation,
        };
        if !shared.state.advance(WorkerState::Rendering) {
            break;
        }
        if let Some(latest) = shared.scene.take_latest() {
            debug!("{kind} worker applying scene update");
            scene = latest;
        }

        let rendered = {
            let _origin = origin.as_deref().map(OriginLock::exclusive);
            context.make_current().and_then(|()| {
                if let Some(size) = shared.resize.take() {
                    role.resize(context, &shared.ledger, size)?;
                }
                role.render(context, &scene)
            })
        };
        shared.generation.store(generation, Ordering::Release);
        match rendered {
            Ok(()) => {
                let count = shared.renders.fetch_add(1, Ordering::AcqRel) + 1;
                debug!("{kind} worker rendered generation {generation} (render #{count})");
            }
            Err(err) => {
                warn!("{kind} worker render failed at generation {generation}: {err}");
                shared.record_error(err);
            }
        }

        if !shared.state.advance(WorkerState::Ready) {
            break;
        }
    }
}

/// ### English
/// Releases everything the role created, then the context itself: objects before the context,
/// release-current before destroy.
///
/// ### 中文
/// 释放角色创建的所有对象，然后释放上下文本身：对象先于上下文，先解除 current 再销毁。
fn teardown<B: GpuBackend>(
    shared: &WorkerShared,
    mut context: B::Context,
    role: &mut dyn WorkerRole<B>,
) {
    let kind = shared.kind;
    let origin = role.origin();
    let guard = origin.as_deref().map(OriginLock::exclusive);
    match context.make_current() {
        Ok(()) => role.teardown(&mut context, &shared.ledger),
        Err(err) => error!("{kind} worker teardown leaks objects, context not current: {err}"),
    }
    context.release_current();
    context.destroy();
    drop(guard);
    shared.ledger.release(GpuObjectKind::Context);

    let outstanding = shared.ledger.snapshot();
    if !outstanding.is_empty() {
        error!("{kind} worker stopped with outstanding objects: {outstanding}");
    }
    shared.state.advance(WorkerState::Stopped);
    info!("{kind} worker STOPPED");
}
