//! ### English
//! Textured-quad program shared by both workers.
//!
//! ### 中文
//! 两个 worker 共用的纹理四边形 program。

use log::error;

use crate::engine::error::Result;
use crate::engine::gpu::{BufferId, GpuContext, ProgramId, ShaderStage};
use crate::engine::ledger::{GpuObjectKind, ResourceLedger};

pub const QUAD_VERTEX_SHADER: &str = r#"#version 300 es
in vec2 a_unit;
uniform vec4 u_rect;
out vec2 v_uv;
void main() {
    vec2 position = mix(u_rect.xy, u_rect.zw, a_unit);
    v_uv = vec2(a_unit.x, 1.0 - a_unit.y);
    gl_Position = vec4(position, 0.0, 1.0);
}
"#;

pub const QUAD_FRAGMENT_SHADER: &str = r#"#version 300 es
precision mediump float;
in vec2 v_uv;
uniform sampler2D u_texture;
uniform vec4 u_tint;
out vec4 o_color;
void main() {
    o_color = texture(u_texture, v_uv) * u_tint;
}
"#;

/// ### English
/// Unit square as a triangle strip; `u_rect` (left, bottom, right, top) places it in NDC.
///
/// ### 中文
/// 以三角形带表示的单位正方形；由 `u_rect`（left、bottom、right、top）把它放到 NDC 中。
pub const UNIT_QUAD: [f32; 8] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];

/// ### English
/// Compiles and links the quad program. The shader objects are deleted once linking is done,
/// successful or not.
///
/// ### 中文
/// 编译并链接四边形 program；无论链接是否成功，链接结束后都会删除 shader 对象。
pub fn build_quad_program<C: GpuContext>(
    context: &mut C,
    ledger: &ResourceLedger,
) -> Result<ProgramId> {
    let vertex = context.compile_shader(ShaderStage::Vertex, QUAD_VERTEX_SHADER)?;
    ledger.track(GpuObjectKind::Shader);

    let fragment = match context.compile_shader(ShaderStage::Fragment, QUAD_FRAGMENT_SHADER) {
        Ok(fragment) => fragment,
        Err(err) => {
            context.delete_shader(vertex);
            ledger.release(GpuObjectKind::Shader);
            return Err(err);
        }
    };
    ledger.track(GpuObjectKind::Shader);

    let linked = context.link_program(vertex, fragment);
    context.delete_shader(vertex);
    ledger.release(GpuObjectKind::Shader);
    context.delete_shader(fragment);
    ledger.release(GpuObjectKind::Shader);

    match linked {
        Ok(program) => {
            ledger.track(GpuObjectKind::Program);
            Ok(program)
        }
        Err(err) => {
            error!("quad program failed to link: {err}");
            Err(err)
        }
    }
}

pub fn upload_unit_quad<C: GpuContext>(context: &mut C, ledger: &ResourceLedger) -> BufferId {
    let buffer = context.create_vertex_buffer(&UNIT_QUAD);
    ledger.track(GpuObjectKind::Buffer);
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::ResourceError;
    use crate::engine::gpu::GpuBackend;
    use crate::engine::gpu::software::{Fault, SoftwareBackend};

    #[test]
    fn program_keeps_no_shader_objects() {
        let backend = SoftwareBackend::new();
        let ledger = ResourceLedger::default();
        let mut context = backend.create_context(None).unwrap();
        context.make_current().unwrap();

        let program = build_quad_program(&mut context, &ledger).unwrap();
        let counts = ledger.snapshot();
        assert_eq!(counts.get(GpuObjectKind::Program), 1);
        assert_eq!(counts.get(GpuObjectKind::Shader), 0);
        assert_eq!(backend.live_objects().get(GpuObjectKind::Shader), 0);

        context.delete_program(program);
        ledger.release(GpuObjectKind::Program);
        assert!(ledger.snapshot().is_empty());
        context.release_current();
    }

    #[test]
    fn compile_and_link_failures_leave_nothing_behind() {
        let backend = SoftwareBackend::new();
        let ledger = ResourceLedger::default();
        let mut context = backend.create_context(None).unwrap();
        context.make_current().unwrap();

        backend.inject(Fault::ShaderCompile(ShaderStage::Fragment));
        assert!(matches!(
            build_quad_program(&mut context, &ledger),
            Err(ResourceError::ShaderCompileFailed {
                stage: ShaderStage::Fragment,
                ..
            })
        ));
        assert!(ledger.snapshot().is_empty());

        backend.inject(Fault::ProgramLink);
        assert!(matches!(
            build_quad_program(&mut context, &ledger),
            Err(ResourceError::ProgramLinkFailed(_))
        ));
        assert!(ledger.snapshot().is_empty());
        assert!(backend.live_objects().get(GpuObjectKind::Shader) == 0);
        context.release_current();
    }
}
