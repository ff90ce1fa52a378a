//! Build script: export the commit and dirty mark shown by `--version`.

use std::process::Command;

/// Stdout of a successful git invocation.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn main() {
    for path in [".git/HEAD", ".git/refs/heads/", ".git/index"] {
        println!("cargo:rerun-if-changed={path}");
    }

    let hash = git(&["rev-parse", "--short=7", "HEAD"])
        .filter(|hash| !hash.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=BUILD_HASH={hash}");

    // porcelain output is empty for a clean tree
    let dirty = git(&["status", "--porcelain"]).is_some_and(|status| !status.is_empty());
    println!(
        "cargo:rustc-env=BUILD_DIRTY_MARK={}",
        if dirty { "*" } else { "" }
    );
}
