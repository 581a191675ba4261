use std::process::Command;

/// Run a git command and return its trimmed stdout, if git is present and succeeds.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn main() {
    // Stamped into the startup banner so an operator can tell which build drives the fan
    if let Some(hash) = git(&["rev-parse", "--short", "HEAD"]) {
        println!("cargo:rustc-env=THERMOPI_GIT_HASH={}", hash);
    }
    if let Some(desc) = git(&["describe", "--always", "--dirty", "--tags"]) {
        println!("cargo:rustc-env=THERMOPI_GIT_DESC={}", desc);
    }

    println!(
        "cargo:rustc-env=THERMOPI_BUILD_TIME={}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("cargo:rerun-if-changed=build.rs");
}
