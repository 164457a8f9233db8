use std::{process::Command, time::SystemTime};

fn main() {
  let now = SystemTime::now()
    .duration_since(SystemTime::UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or_default();
  println!("cargo:rustc-env=BUILD_TIME={}", now);

  println!("cargo:rerun-if-changed=.git/HEAD");
  println!("cargo:rerun-if-changed=build.rs");

  if let Some(commit) = git(&["rev-parse", "--short", "HEAD"]) {
    println!("cargo:rustc-env=GIT_COMMIT={}", commit);
  }
}

fn git(args: &[&str]) -> Option<String> {
  let output = Command::new("git").args(args).output().ok()?;
  if !output.status.success() {
    return None;
  }
  let text = String::from_utf8(output.stdout).ok()?;
  Some(text.trim().to_string()).filter(|s| !s.is_empty())
}
