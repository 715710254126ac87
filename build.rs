// Build script to compile GLSL shaders to SPIR-V
//
// The binaries land in OUT_DIR and are embedded with include_bytes!.
// Without glslc we still produce (empty) files so the crate compiles;
// the shader loader refuses empty blobs at runtime.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    compile_shader("shaders/triangle.vert", &out_dir.join("triangle.vert.spv"));
    compile_shader("shaders/triangle.frag", &out_dir.join("triangle.frag.spv"));
}

fn compile_shader(input: &str, output: &Path) {
    let result = Command::new("glslc")
        .arg(input)
        .arg("-o")
        .arg(output)
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), {} will be empty", e, output.display());
            println!("cargo:warning=Install the Vulkan SDK to build working shaders");
            fs::write(output, []).expect("failed to write placeholder shader");
        }
    }
}
