use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use wgpu::naga;
use wgpu::naga::ShaderStage;

use crate::gpu::uniforms::{EffectUniforms, UNIFORM_FIELDS};

/// Vertex attribute carrying clip-space quad corners.
pub const POSITION_ATTRIBUTE: &str = "a_position";
/// Vertex attribute carrying texture coordinates.
pub const TEX_COORD_ATTRIBUTE: &str = "a_texCoord";

/// Pipeline stage a diagnostic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Vertex,
    Fragment,
}

impl Stage {
    fn naga(self) -> ShaderStage {
        match self {
            Stage::Vertex => ShaderStage::Vertex,
            Stage::Fragment => ShaderStage::Fragment,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Vertex => f.write_str("vertex"),
            Stage::Fragment => f.write_str("fragment"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("{stage} shader failed to compile:\n{message}")]
    Parse { stage: Stage, message: String },
    #[error("{stage} shader failed validation:\n{message}")]
    Validation { stage: Stage, message: String },
    #[error("failed to link program: {0}")]
    Link(String),
    #[error("program does not declare uniform '{0}'")]
    MissingUniform(String),
    #[error("uniform '{name}' sits at byte {found}, expected {expected}")]
    UniformOffset { name: String, found: u32, expected: u32 },
    #[error("uniform block is {found} bytes, expected {expected}")]
    UniformBlockSize { found: u32, expected: u32 },
    #[error("vertex stage does not declare attribute '{0}'")]
    MissingAttribute(String),
    #[error("fragment stage does not declare the {0} binding")]
    MissingBinding(&'static str),
    #[error("GPU rejected the program: {0}")]
    Device(String),
}

/// GLSL sources for one vertex + fragment program.
#[derive(Debug, Clone)]
pub struct ShaderSources {
    pub vertex: Cow<'static, str>,
    pub fragment: Cow<'static, str>,
}

impl ShaderSources {
    /// The built-in CRT effect chain.
    pub fn crt() -> Self {
        Self {
            vertex: Cow::Borrowed(QUAD_VERTEX_GLSL),
            fragment: Cow::Borrowed(CRT_FRAGMENT_GLSL),
        }
    }

    pub fn new(vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            vertex: Cow::Owned(vertex.into()),
            fragment: Cow::Owned(fragment.into()),
        }
    }
}

impl Default for ShaderSources {
    fn default() -> Self {
        Self::crt()
    }
}

/// Input locations resolved once when the program is built and reused every frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramLayout {
    pub position_location: u32,
    pub tex_coord_location: u32,
    uniform_offsets: BTreeMap<&'static str, u32>,
}

impl ProgramLayout {
    /// Byte offset of a uniform inside the effect block, e.g. `u_curvature`.
    pub fn uniform_offset(&self, name: &str) -> Option<u32> {
        self.uniform_offsets.get(name).copied()
    }

    pub fn uniform_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.uniform_offsets.keys().copied()
    }
}

/// Parses, validates and links both stages, then resolves every input the
/// compositor feeds. Either the whole program is usable or an error is returned.
pub fn compile_program(sources: &ShaderSources) -> Result<ProgramLayout, CompileError> {
    let vertex = parse_stage(Stage::Vertex, &sources.vertex)?;
    let fragment = parse_stage(Stage::Fragment, &sources.fragment)?;

    link_interfaces(&vertex, &fragment)?;

    let position_location = attribute_location(&vertex, POSITION_ATTRIBUTE)?;
    let tex_coord_location = attribute_location(&vertex, TEX_COORD_ATTRIBUTE)?;
    let uniform_offsets = resolve_uniforms(&fragment)?;
    require_binding(&fragment, 1, 0, "frame texture", |inner| {
        matches!(inner, naga::TypeInner::Image { .. })
    })?;
    require_binding(&fragment, 1, 1, "frame sampler", |inner| {
        matches!(inner, naga::TypeInner::Sampler { .. })
    })?;

    Ok(ProgramLayout {
        position_location,
        tex_coord_location,
        uniform_offsets,
    })
}

/// Validates a single GLSL stage without needing a GPU.
pub(crate) fn parse_stage(stage: Stage, source: &str) -> Result<naga::Module, CompileError> {
    let mut frontend = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options::from(stage.naga());
    let module = frontend
        .parse(&options, source)
        .map_err(|errors| CompileError::Parse {
            stage,
            message: errors.emit_to_string(source),
        })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|error| CompileError::Validation {
        stage,
        message: error.emit_to_string(source),
    })?;

    Ok(module)
}

fn entry_point(module: &naga::Module) -> Option<&naga::EntryPoint> {
    module.entry_points.iter().find(|entry| entry.name == "main")
}

fn location_of(binding: Option<&naga::Binding>) -> Option<u32> {
    match binding {
        Some(naga::Binding::Location { location, .. }) => Some(*location),
        _ => None,
    }
}

fn vertex_output_locations(module: &naga::Module) -> BTreeSet<u32> {
    let mut locations = BTreeSet::new();
    let Some(result) = entry_point(module).and_then(|entry| entry.function.result.as_ref()) else {
        return locations;
    };
    if let Some(location) = location_of(result.binding.as_ref()) {
        locations.insert(location);
    }
    if let naga::TypeInner::Struct { members, .. } = &module.types[result.ty].inner {
        locations.extend(
            members
                .iter()
                .filter_map(|member| location_of(member.binding.as_ref())),
        );
    }
    locations
}

fn link_interfaces(vertex: &naga::Module, fragment: &naga::Module) -> Result<(), CompileError> {
    let Some(fragment_entry) = entry_point(fragment) else {
        return Err(CompileError::Link("fragment stage has no main entry point".into()));
    };
    if entry_point(vertex).is_none() {
        return Err(CompileError::Link("vertex stage has no main entry point".into()));
    }

    let produced = vertex_output_locations(vertex);
    for argument in &fragment_entry.function.arguments {
        if let Some(location) = location_of(argument.binding.as_ref()) {
            if !produced.contains(&location) {
                return Err(CompileError::Link(format!(
                    "fragment input '{}' at location {location} is not written by the vertex stage",
                    argument.name.as_deref().unwrap_or("<unnamed>")
                )));
            }
        }
    }
    Ok(())
}

fn attribute_location(module: &naga::Module, name: &str) -> Result<u32, CompileError> {
    entry_point(module)
        .and_then(|entry| {
            entry
                .function
                .arguments
                .iter()
                .find(|argument| argument.name.as_deref() == Some(name))
        })
        .and_then(|argument| location_of(argument.binding.as_ref()))
        .ok_or_else(|| CompileError::MissingAttribute(name.to_string()))
}

fn resolve_uniforms(module: &naga::Module) -> Result<BTreeMap<&'static str, u32>, CompileError> {
    let block = module.global_variables.iter().find_map(|(_, variable)| {
        let binding = variable.binding.as_ref()?;
        if !matches!(variable.space, naga::AddressSpace::Uniform)
            || binding.group != 0
            || binding.binding != 0
        {
            return None;
        }
        match &module.types[variable.ty].inner {
            naga::TypeInner::Struct { members, span } => Some((members, *span)),
            _ => None,
        }
    });
    let Some((members, span)) = block else {
        return Err(CompileError::MissingBinding("effect uniform block"));
    };

    let expected_size = std::mem::size_of::<EffectUniforms>() as u32;
    if span != expected_size {
        return Err(CompileError::UniformBlockSize {
            found: span,
            expected: expected_size,
        });
    }

    let mut offsets = BTreeMap::new();
    for (name, expected) in UNIFORM_FIELDS {
        let member = members
            .iter()
            .find(|member| member.name.as_deref() == Some(name))
            .ok_or_else(|| CompileError::MissingUniform(name.to_string()))?;
        let expected = expected as u32;
        if member.offset != expected {
            return Err(CompileError::UniformOffset {
                name: name.to_string(),
                found: member.offset,
                expected,
            });
        }
        offsets.insert(name, member.offset);
    }
    Ok(offsets)
}

fn require_binding(
    module: &naga::Module,
    group: u32,
    binding: u32,
    what: &'static str,
    accepts: impl Fn(&naga::TypeInner) -> bool,
) -> Result<(), CompileError> {
    let found = module.global_variables.iter().any(|(_, variable)| {
        variable
            .binding
            .as_ref()
            .is_some_and(|b| b.group == group && b.binding == binding)
            && accepts(&module.types[variable.ty].inner)
    });
    if found {
        Ok(())
    } else {
        Err(CompileError::MissingBinding(what))
    }
}

/// Full-screen quad vertex stage; corners and UVs come from static buffers.
pub(crate) const QUAD_VERTEX_GLSL: &str = r"#version 450
layout(location = 0) in vec2 a_position;
layout(location = 1) in vec2 a_texCoord;
layout(location = 0) out vec2 v_texCoord;

void main() {
    v_texCoord = a_texCoord;
    gl_Position = vec4(a_position, 0.0, 1.0);
}
";

/// CRT effect chain. The uniform block layout must match [`EffectUniforms`].
///
/// Sampling uses an explicit LOD because it happens after the non-uniform
/// out-of-bounds branch.
pub(crate) const CRT_FRAGMENT_GLSL: &str = r"#version 450
layout(location = 0) in vec2 v_texCoord;
layout(location = 0) out vec4 outColor;

layout(std140, set = 0, binding = 0) uniform EffectParams {
    float u_time;
    float u_scanlineIntensity;
    float u_scanlineCount;
    float u_rollingSpeed;
    float u_vignetteStrength;
    float u_brightness;
    float u_curvature;
    float u_rgbShift;
    float u_flickerSpeed;
    float u_flickerIntensity;
    float u_noiseAmount;
    float u_padding0;
} params;

layout(set = 1, binding = 0) uniform texture2D u_frameTexture;
layout(set = 1, binding = 1) uniform sampler u_frameSampler;

float rand(vec2 co) {
    return fract(sin(dot(co, vec2(12.9898, 78.233))) * 43758.5453);
}

vec3 sampleShifted(vec2 uv) {
    vec2 shift = vec2(params.u_rgbShift, 0.0);
    float r = textureLod(sampler2D(u_frameTexture, u_frameSampler), uv - shift, 0.0).r;
    float g = textureLod(sampler2D(u_frameTexture, u_frameSampler), uv, 0.0).g;
    float b = textureLod(sampler2D(u_frameTexture, u_frameSampler), uv + shift, 0.0).b;
    return vec3(r, g, b);
}

void main() {
    vec2 centered = v_texCoord * 2.0 - 1.0;
    vec2 offset = centered.yx * centered.yx * vec2(params.u_curvature);
    centered += centered * offset;
    vec2 uv = centered * 0.5 + 0.5;

    if (uv.x < 0.0 || uv.x > 1.0 || uv.y < 0.0 || uv.y > 1.0) {
        outColor = vec4(0.0, 0.0, 0.0, 1.0);
    } else {
        float scanline = sin(uv.y * params.u_scanlineCount + params.u_time * params.u_rollingSpeed);
        scanline = scanline * 0.5 + 0.5;

        vec3 color = sampleShifted(uv);
        color *= params.u_brightness;
        color *= 1.0 - scanline * params.u_scanlineIntensity;
        color *= 1.0 - length(centered) * params.u_vignetteStrength;
        color *= 1.0 - sin(params.u_time * params.u_flickerSpeed) * params.u_flickerIntensity;

        float noise = rand(uv + vec2(params.u_time * 0.001));
        color += (noise - 0.5) * params.u_noiseAmount;

        outColor = vec4(color, 1.0);
    }
}
";

/// Copies the composited output into the window, letterboxed by the viewport.
pub(crate) const PRESENT_FRAGMENT_GLSL: &str = r"#version 450
layout(location = 0) in vec2 v_texCoord;
layout(location = 0) out vec4 outColor;

layout(set = 0, binding = 0) uniform texture2D u_outputTexture;
layout(set = 0, binding = 1) uniform sampler u_outputSampler;

void main() {
    outColor = vec4(texture(sampler2D(u_outputTexture, u_outputSampler), v_texCoord).rgb, 1.0);
}
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_program_resolves_every_input() {
        let layout = compile_program(&ShaderSources::crt()).expect("compile builtin program");
        assert_eq!(layout.position_location, 0);
        assert_eq!(layout.tex_coord_location, 1);
        assert_eq!(layout.uniform_offset("u_time"), Some(0));
        for (name, offset) in UNIFORM_FIELDS {
            assert_eq!(layout.uniform_offset(name), Some(offset as u32), "{name}");
        }
        assert_eq!(layout.uniform_names().count(), UNIFORM_FIELDS.len());
    }

    #[test]
    fn present_fragment_is_valid_glsl() {
        parse_stage(Stage::Fragment, PRESENT_FRAGMENT_GLSL).expect("present shader");
    }

    #[test]
    fn syntax_error_is_reported_per_stage() {
        let sources = ShaderSources::new(QUAD_VERTEX_GLSL, "#version 450\nvoid main( {");
        let err = compile_program(&sources).unwrap_err();
        assert!(matches!(err, CompileError::Parse { stage: Stage::Fragment, .. }));

        let sources = ShaderSources::new("#version 450\nvoid main() { undefined_call(); }", CRT_FRAGMENT_GLSL);
        let err = compile_program(&sources).unwrap_err();
        assert!(matches!(err, CompileError::Parse { stage: Stage::Vertex, .. }));
    }

    #[test]
    fn missing_uniform_disables_program() {
        let fragment = CRT_FRAGMENT_GLSL
            .replace("float u_noiseAmount;", "float u_noiseLevel;")
            .replace("params.u_noiseAmount", "params.u_noiseLevel");
        let err = compile_program(&ShaderSources::new(QUAD_VERTEX_GLSL, fragment)).unwrap_err();
        assert!(matches!(err, CompileError::MissingUniform(ref name) if name == "u_noiseAmount"));
    }

    #[test]
    fn reordered_uniform_block_is_rejected() {
        let fragment = CRT_FRAGMENT_GLSL.replace(
            "    float u_time;\n    float u_scanlineIntensity;",
            "    float u_scanlineIntensity;\n    float u_time;",
        );
        let err = compile_program(&ShaderSources::new(QUAD_VERTEX_GLSL, fragment)).unwrap_err();
        assert!(matches!(err, CompileError::UniformOffset { .. }));
    }

    #[test]
    fn missing_attribute_is_reported() {
        let vertex = QUAD_VERTEX_GLSL
            .replace("layout(location = 1) in vec2 a_texCoord;\n", "")
            .replace("v_texCoord = a_texCoord;", "v_texCoord = a_position * 0.5 + 0.5;");
        let err = compile_program(&ShaderSources::new(vertex, CRT_FRAGMENT_GLSL)).unwrap_err();
        assert!(matches!(err, CompileError::MissingAttribute(ref name) if name == TEX_COORD_ATTRIBUTE));
    }

    #[test]
    fn unmatched_varying_fails_to_link() {
        let fragment = CRT_FRAGMENT_GLSL.replace(
            "layout(location = 0) in vec2 v_texCoord;",
            "layout(location = 3) in vec2 v_texCoord;",
        );
        let err = compile_program(&ShaderSources::new(QUAD_VERTEX_GLSL, fragment)).unwrap_err();
        assert!(matches!(err, CompileError::Link(_)));
    }
}
