use std::process::Command;

fn main() {
    // Embed build timestamp for `chanbot --version` and the startup banner
    let timestamp = Command::new("date")
        .args(["-u", "+%Y-%m-%d %H:%M:%S UTC"])
        .output()
        .ok()
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=CHANBOT_BUILD_TIME={}", timestamp.trim());

    // Embed git short SHA
    let git_sha = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=CHANBOT_GIT_SHA={}", git_sha.trim());
    println!("cargo:rerun-if-changed=build.rs");
}
