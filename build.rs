// SPDX-License-Identifier: MPL-2.0

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-env-changed=CAMERA_VISION_VERSION");

    // Packagers may pin the version string
    let version = std::env::var("CAMERA_VISION_VERSION").unwrap_or_else(|_| build_version());
    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// Package version, suffixed with the short commit hash when built from git
fn build_version() -> String {
    let package = std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
    match commit_hash() {
        Some(hash) => format!("{}-{}", package, hash),
        None => package,
    }
}

fn commit_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;

    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}
