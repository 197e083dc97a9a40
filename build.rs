use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    // Copy config and reference assets next to the built executable
    let Some(target_dir) = target_dir() else {
        println!("cargo:warning=Could not find target directory; assets not copied");
        return;
    };

    copy_config(&target_dir);
    for dir in ["vision", "sounds"] {
        copy_asset_dir(dir, &target_dir);
    }
}

/// OUT_DIR is something like target/release/build/trainer-xxx/out.
/// Go up 3 levels: out -> hash -> build -> release
fn target_dir() -> Option<PathBuf> {
    let out_dir = env::var("OUT_DIR").ok()?;
    Path::new(&out_dir).ancestors().nth(3).map(Path::to_path_buf)
}

/// Copies `name/` to the target directory so the executable can find it.
fn copy_asset_dir(name: &str, target_dir: &Path) {
    let src = Path::new(name);
    if src.exists() {
        copy_dir_recursive(src, &target_dir.join(name));
        // Tell Cargo to re-run if assets change
        println!("cargo:rerun-if-changed={name}/");
    }
}

/// Recursively copies a directory and its contents.
fn copy_dir_recursive(src: &Path, dst: &Path) {
    let _ = fs::create_dir_all(dst);

    if let Ok(entries) = fs::read_dir(src) {
        for entry in entries.flatten() {
            let src_path = entry.path();
            let dst_path = dst.join(entry.file_name());

            if src_path.is_dir() {
                copy_dir_recursive(&src_path, &dst_path);
            } else {
                let _ = fs::copy(&src_path, &dst_path);
            }
        }
    }
}

/// Copies config.json to the target directory.
fn copy_config(target_dir: &Path) {
    let config_src = Path::new("config.json");
    if config_src.exists() {
        let _ = fs::copy(config_src, target_dir.join("config.json"));
        println!("cargo:rerun-if-changed=config.json");
    }
}
