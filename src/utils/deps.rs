use std::path::Path;
use std::process::{Command, Stdio};

/// Check that the configured transcoder binary runs
pub fn check_transcoder(binary: &Path) -> bool {
    check_command(binary, &["-version"])
}

/// Check if a command is available
fn check_command(cmd: &Path, args: &[&str]) -> bool {
    Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}
