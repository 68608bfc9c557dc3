//! ### English
//! Surface worker role: owns the share-group origin context, the window target and every shared
//! GPU object (quad program, vertex buffer, asset textures).
//!
//! ### 中文
//! surface worker 角色：持有共享组的源上下文、窗口目标以及所有共享 GPU 对象（四边形 program、顶点缓冲、资源纹理）。

use std::collections::HashMap;
use std::sync::Arc;

use dpi::PhysicalSize;
use log::debug;

use crate::engine::coordinator::{OriginLock, SharedObjects, SharedScene};
use crate::engine::error::{ResourceError, Result};
use crate::engine::gpu::{BufferId, GpuBackend, GpuContext, ProgramId, TextureFilter, TextureId};
use crate::engine::ledger::{GpuObjectKind, ResourceLedger};
use crate::engine::rendering::{SurfaceTarget, draw_scene, shaders};
use crate::engine::scene::{ResourceId, SceneState};

use super::role::WorkerRole;
use super::{SurfaceSetup, WorkerKind};

pub(crate) struct SurfaceRole<B: GpuBackend> {
    setup: SurfaceSetup<B>,
    native: Option<B::NativeSurface>,
    target: Option<SurfaceTarget>,
    program: Option<ProgramId>,
    vertices: Option<BufferId>,
    textures: Vec<(ResourceId, TextureId)>,
    objects: Arc<SharedObjects>,
}

impl<B: GpuBackend> SurfaceRole<B> {
    pub(crate) fn new(setup: SurfaceSetup<B>) -> Self {
        Self {
            setup,
            native: None,
            target: None,
            program: None,
            vertices: None,
            textures: Vec::new(),
            objects: Arc::new(SharedObjects::default()),
        }
    }

    fn upload_assets(&mut self, context: &mut B::Context, ledger: &ResourceLedger) -> Result<()> {
        for spec in &self.setup.asset_specs {
            let image = self.setup.assets.decode(&spec.path).map_err(|reason| {
                ResourceError::AssetLoadFailed {
                    path: spec.path.clone(),
                    reason,
                }
            })?;
            let expected = image.size.width as usize * image.size.height as usize * 4;
            if image.size.width == 0 || image.size.height == 0 || image.pixels.len() != expected {
                return Err(ResourceError::AssetLoadFailed {
                    path: spec.path.clone(),
                    reason: format!(
                        "decoded {} bytes for a {}x{} image",
                        image.pixels.len(),
                        image.size.width,
                        image.size.height
                    ),
                });
            }
            let texture =
                context.create_texture(image.size, Some(&image.pixels), TextureFilter::Linear);
            ledger.track(GpuObjectKind::Texture);
            self.textures.push((spec.id, texture));
            debug!(
                "asset {} uploaded from `{}` ({}x{})",
                spec.id.0, spec.path, image.size.width, image.size.height
            );
        }
        Ok(())
    }
}

impl<B: GpuBackend> WorkerRole<B> for SurfaceRole<B> {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Surface
    }

    fn create_context(&mut self, backend: &B) -> Result<B::Context> {
        backend.create_context(None)
    }

    fn init(&mut self, context: &mut B::Context, ledger: &ResourceLedger) -> Result<()> {
        let surface = self.setup.provider.acquire().ok_or_else(|| {
            ResourceError::SurfaceCreationFailed("host has no drawable surface".to_string())
        })?;
        let target = SurfaceTarget::window(context, ledger, &surface.native, surface.size)?;
        self.target = Some(target);
        self.native = Some(surface.native);

        let program = shaders::build_quad_program(context, ledger)?;
        self.program = Some(program);
        let vertices = shaders::upload_unit_quad(context, ledger);
        self.vertices = Some(vertices);
        self.upload_assets(context, ledger)?;

        self.objects = Arc::new(SharedObjects {
            program,
            vertices,
            textures: self.textures.iter().copied().collect::<HashMap<_, _>>(),
        });
        self.setup.coordinator.publish(SharedScene {
            handle: context.handle(),
            objects: self.objects.clone(),
            origin: self.setup.coordinator.origin().clone(),
        });
        Ok(())
    }

    fn resize(
        &mut self,
        context: &mut B::Context,
        ledger: &ResourceLedger,
        size: PhysicalSize<u32>,
    ) -> Result<()> {
        if self.target.as_ref().is_some_and(|target| target.size() == size) {
            return Ok(());
        }
        let Some(native) = self.native.as_ref() else {
            return Err(ResourceError::SurfaceCreationFailed(
                "no native surface to recreate".to_string(),
            ));
        };
        if let Some(old) = self.target.take() {
            old.destroy(context, ledger);
        }
        debug!("surface target recreated at {}x{}", size.width, size.height);
        self.target = Some(SurfaceTarget::window(context, ledger, native, size)?);
        Ok(())
    }

    fn render(&mut self, context: &mut B::Context, scene: &SceneState) -> Result<()> {
        let Some(target) = self.target.as_ref() else {
            return Err(ResourceError::SurfaceCreationFailed(
                "window target is missing".to_string(),
            ));
        };
        target.bind(context)?;
        draw_scene(context, scene, &self.objects);
        target.present(context)
    }

    fn teardown(&mut self, context: &mut B::Context, ledger: &ResourceLedger) {
        for (_, texture) in self.textures.drain(..) {
            context.delete_texture(texture);
            ledger.release(GpuObjectKind::Texture);
        }
        if let Some(vertices) = self.vertices.take() {
            context.delete_buffer(vertices);
            ledger.release(GpuObjectKind::Buffer);
        }
        if let Some(program) = self.program.take() {
            context.delete_program(program);
            ledger.release(GpuObjectKind::Program);
        }
        if let Some(target) = self.target.take() {
            target.destroy(context, ledger);
        }
        self.native = None;
    }

    fn origin(&self) -> Option<Arc<OriginLock>> {
        Some(self.setup.coordinator.origin().clone())
    }

    fn abandon(&mut self, reason: &ResourceError) {
        self.setup.coordinator.abandon(reason.clone());
    }
}
