//! Build script compiling the GLSL sources in `shaders/` to SPIR-V.
//!
//! Every `<name>.{vert,frag,comp}` becomes `$OUT_DIR/shaders/<name>.{ext}.spv`.
//! `#include` directives resolve against `shaders/`.

use shaderc::{CompileOptions, Compiler, IncludeType, ResolvedInclude, ShaderKind};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set")).join("shaders");
    let shader_dir = Path::new("shaders");

    // Rerun if shaders change
    println!("cargo:rerun-if-changed=shaders/");

    fs::create_dir_all(&out_dir)
        .unwrap_or_else(|e| panic!("Failed to create {}: {e}", out_dir.display()));

    let compiler = Compiler::new().expect("Failed to create shader compiler");

    let mut sources: Vec<PathBuf> = fs::read_dir(shader_dir)
        .expect("Failed to read shaders/")
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| shader_kind(path).is_some())
        .collect();
    sources.sort();

    for source in sources {
        let Some(kind) = shader_kind(&source) else {
            continue;
        };
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .expect("Shader file names are UTF-8");
        compile_shader(
            &compiler,
            shader_dir,
            &source,
            &out_dir.join(format!("{file_name}.spv")),
            kind,
        );
    }
}

fn shader_kind(path: &Path) -> Option<ShaderKind> {
    match path.extension()?.to_str()? {
        "vert" => Some(ShaderKind::Vertex),
        "frag" => Some(ShaderKind::Fragment),
        "comp" => Some(ShaderKind::Compute),
        _ => None,
    }
}

fn compile_shader(compiler: &Compiler, include_dir: &Path, input: &Path, output: &Path, kind: ShaderKind) {
    let source = fs::read_to_string(input)
        .unwrap_or_else(|e| panic!("Failed to read shader {}: {e}", input.display()));
    let file_name = input
        .file_name()
        .and_then(|n| n.to_str())
        .expect("Shader file names are UTF-8");

    let mut options = CompileOptions::new().expect("Failed to create compile options");
    options.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_2 as u32,
    );
    options.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let include_dir = include_dir.to_path_buf();
    options.set_include_callback(move |requested, _kind: IncludeType, _from, _depth| {
        let path = include_dir.join(requested);
        let content = fs::read_to_string(&path)
            .map_err(|e| format!("Failed to include {}: {e}", path.display()))?;
        Ok(ResolvedInclude {
            resolved_name: path.display().to_string(),
            content,
        })
    });

    let result = compiler
        .compile_into_spirv(&source, kind, file_name, "main", Some(&options))
        .unwrap_or_else(|e| panic!("Failed to compile shader {}: {e}", input.display()));

    if result.get_num_warnings() > 0 {
        println!(
            "cargo:warning=Shader warnings in {}: {}",
            input.display(),
            result.get_warning_messages()
        );
    }

    fs::write(output, bytemuck::cast_slice::<u32, u8>(result.as_binary()))
        .unwrap_or_else(|e| panic!("Failed to write shader {}: {e}", output.display()));
}
