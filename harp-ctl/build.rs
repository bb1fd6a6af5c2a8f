//! Build identification for the `laser-harp` startup banner
//!
//! Sets `HARP_BUILD_ID` (short git hash, `+dirty` when the tree has local
//! changes, or `v<version>` outside a checkout), `HARP_BUILD_TIME` and
//! `HARP_BUILD_PROFILE`.

use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-changed=../.git/index");

    let version = std::env::var("CARGO_PKG_VERSION").unwrap_or_default();
    let build_id = match git(&["rev-parse", "--short=8", "HEAD"]) {
        Some(hash) => {
            let dirty = git(&["status", "--porcelain", "--untracked-files=no"])
                .is_some_and(|status| !status.is_empty());
            if dirty {
                format!("{}+dirty", hash)
            } else {
                hash
            }
        }
        None => format!("v{}", version),
    };

    let build_time = chrono::Utc::now().format("%Y-%m-%d %H:%M UTC");
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=HARP_BUILD_ID={}", build_id);
    println!("cargo:rustc-env=HARP_BUILD_TIME={}", build_time);
    println!("cargo:rustc-env=HARP_BUILD_PROFILE={}", profile);
}
