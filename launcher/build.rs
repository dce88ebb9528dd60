use std::{
    env,
    path::{Path, PathBuf},
    process::Command,
};

const TRACER_LIB: &str = "libvizzy.so";

fn main() {
    println!("cargo:rerun-if-changed=../tracer/src");
    println!("cargo:rerun-if-changed=../tracer/Cargo.toml");
    println!("cargo:rerun-if-changed=../common/src");
    println!("cargo:rerun-if-env-changed=VIZZY_TRACER_SO");

    let out_dir = PathBuf::from(env::var_os("OUT_DIR").unwrap());
    let embedded = out_dir.join(TRACER_LIB);

    // A prebuilt tracer short-circuits the nested build.
    let built = match env::var_os("VIZZY_TRACER_SO") {
        Some(prebuilt)  => PathBuf::from(prebuilt),
        None            => build_tracer(&out_dir),
    };
    std::fs::copy(&built, &embedded).unwrap_or_else(|e| {
        panic!("Couldn't copy {} into {}: {e}", built.display(), embedded.display())
    });
}

fn build_tracer(out_dir: &Path) -> PathBuf {
    let manifest_dir = PathBuf::from(env::var_os("CARGO_MANIFEST_DIR").unwrap());
    let tracer_manifest = manifest_dir.join("..").join("tracer").join("Cargo.toml");
    let target_dir = out_dir.join("tracer");
    let target = env::var_os("TARGET").unwrap();

    let mut command = Command::new(env::var_os("CARGO").unwrap());
    command
        .env_remove("RUSTFLAGS")
        .env_remove("CARGO_ENCODED_RUSTFLAGS");

    for (var, _) in env::vars() {
        if var.starts_with("CARGO_PKG_") || var.starts_with("CARGO_FEATURE_") {
            command.env_remove(var);
        }
    }

    // The image gets scanned for its marker: no debug info that could
    // carry a second copy of it.
    command
        .env("CARGO_PROFILE_RELEASE_DEBUG", "false")
        .env("CARGO_PROFILE_RELEASE_STRIP", "debuginfo")
        .arg("build")
        .arg("--manifest-path")
        .arg(&tracer_manifest)
        .arg("--lib")
        .arg("--release")
        .arg("--target-dir")
        .arg(&target_dir)
        .arg("--target")
        .arg(&target);

    assert!(
        command.status().map(|s| s.success()).unwrap_or(false),
        "Couldn't build the tracer library!"
    );

    let mut lib_path = target_dir.join(target);
    lib_path.push("release");
    lib_path.push(TRACER_LIB);

    lib_path
}
