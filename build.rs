use std::env;
use std::path::{Path, PathBuf};

/// Environment variables that change how `ffmpeg-sys-next` finds FFmpeg.
const DISCOVERY_VARS: [&str; 4] = ["FFMPEG_DIR", "PKG_CONFIG_PATH", "VCPKG_ROOT", "VCPKGRS_TRIPLET"];

fn main() {
    for var in DISCOVERY_VARS {
        println!("cargo:rerun-if-env-changed={var}");
    }

    if let Some(dir) = env::var_os("FFMPEG_DIR") {
        check_ffmpeg_dir(Path::new(&dir));
        return;
    }

    if env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("windows") {
        hint_vcpkg();
    }
}

/// Warn early when `FFMPEG_DIR` points somewhere without headers, instead of
/// letting bindgen fail with an unrelated-looking error.
fn check_ffmpeg_dir(dir: &Path) {
    let header = dir.join("include").join("libavfilter").join("avfilter.h");
    if !header.exists() {
        println!(
            "cargo:warning=FFMPEG_DIR={} has no include/libavfilter/avfilter.h; movielines needs libavfilter for frame sampling.",
            dir.display()
        );
    }
}

fn hint_vcpkg() {
    let Ok(root) = env::var("VCPKG_ROOT") else {
        println!(
            "cargo:warning=Neither FFMPEG_DIR nor VCPKG_ROOT is set. Install FFmpeg (for example `vcpkg install ffmpeg[avfilter]`) and point FFMPEG_DIR at it."
        );
        return;
    };

    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string());
    let installed: PathBuf = [root.as_str(), "installed", triplet.as_str()].iter().collect();

    if installed.exists() {
        println!(
            "cargo:warning=Using vcpkg FFmpeg at {0}; set FFMPEG_DIR={0} to skip discovery.",
            installed.display()
        );
    } else {
        println!(
            "cargo:warning=VCPKG_ROOT is set but {} does not exist.",
            installed.display()
        );
    }
}
