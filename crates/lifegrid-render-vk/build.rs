use std::{env, fs, path::PathBuf};

// Vertex layout shared by every pipeline:
//   binding 0, location 0: R32G32B32_SFLOAT (pos)
//   binding 0, location 1: R32G32_SFLOAT    (uv)

const STEP_VERT: &str = r#"
#version 450
layout(location = 0) in vec3 inPos;
layout(location = 1) in vec2 inUv;

layout(location = 0) out vec2 vUv;

void main() {
    vUv = inUv;
    gl_Position = vec4(inPos, 1.0);
}
"#;

// B3/S23. Texels outside the grid count as dead.
const STEP_FRAG: &str = r#"
#version 450
layout(set = 0, binding = 0) uniform sampler2D cells;

layout(location = 0) out vec4 outColor;

float alive(ivec2 p, ivec2 size) {
    if (p.x < 0 || p.y < 0 || p.x >= size.x || p.y >= size.y) {
        return 0.0;
    }
    return texelFetch(cells, p, 0).r > 0.5 ? 1.0 : 0.0;
}

void main() {
    ivec2 size = textureSize(cells, 0);
    ivec2 p = ivec2(gl_FragCoord.xy);

    float n = 0.0;
    for (int dy = -1; dy <= 1; ++dy) {
        for (int dx = -1; dx <= 1; ++dx) {
            if (dx != 0 || dy != 0) {
                n += alive(p + ivec2(dx, dy), size);
            }
        }
    }

    bool live = n == 3.0 || (n == 2.0 && alive(p, size) > 0.5);
    outColor = live ? vec4(1.0) : vec4(0.0);
}
"#;

const PRESENT_VERT: &str = r#"
#version 450
layout(location = 0) in vec3 inPos;
layout(location = 1) in vec2 inUv;

layout(set = 0, binding = 0) uniform View { mat4 view; } u;

layout(location = 0) out vec2 vUv;

void main() {
    vUv = inUv;
    gl_Position = u.view * vec4(inPos, 1.0);
}
"#;

const PRESENT_FRAG: &str = r#"
#version 450
layout(set = 0, binding = 1) uniform sampler2D cells;

layout(location = 0) in vec2 vUv;
layout(location = 0) out vec4 outColor;

void main() {
    bool live = texture(cells, vUv).r > 0.5;
    outColor = live ? vec4(1.0) : vec4(0.0, 0.0, 0.0, 1.0);
}
"#;

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let shaders = [
        ("step.vert", STEP_VERT, shaderc::ShaderKind::Vertex),
        ("step.frag", STEP_FRAG, shaderc::ShaderKind::Fragment),
        ("present.vert", PRESENT_VERT, shaderc::ShaderKind::Vertex),
        ("present.frag", PRESENT_FRAG, shaderc::ShaderKind::Fragment),
    ];

    for (name, src, kind) in shaders {
        let spv = comp
            .compile_into_spirv(src, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8())
            .unwrap_or_else(|e| panic!("{name}.spv: {e}"));
    }

    println!("cargo:rerun-if-changed=build.rs");
}
