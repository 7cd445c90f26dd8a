use std::process::Command;

fn main() {
  println!("cargo:rerun-if-changed=.git/HEAD");

  let commit = Command::new("git")
    .args(["rev-parse", "--short", "HEAD"])
    .output()
    .ok()
    .filter(|output| output.status.success())
    .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
    .unwrap_or_else(|| "unknown".to_string());

  println!("cargo:rustc-env=GIT_COMMIT={}", commit);
}
