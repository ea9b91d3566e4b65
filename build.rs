use std::process::Command;

// `storyreel --version` shows the short commit hash when built from a checkout.
fn main() {
    if let Some(hash) = short_commit() {
        println!("cargo:rustc-env=STORYREEL_GIT_HASH={hash}");
    }
}

fn short_commit() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let hash = String::from_utf8(output.stdout).ok()?.trim().to_owned();
    (!hash.is_empty()).then_some(hash)
}
