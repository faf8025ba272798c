use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::thread;

/// Render a command line for logs and error messages
pub fn command_line(cmd: &Path, args: &[String]) -> String {
    let mut line = cmd.display().to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&shell_words::quote(arg));
    }
    line
}

/// Run a command and capture stdout
pub fn run_capture(cmd: &Path, args: &[String]) -> Result<String> {
    log::debug!("exec: {}", command_line(cmd, args));
    let output = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("Failed to execute: {}", command_line(cmd, args)))?;
    checked(cmd, args, output)
}

/// Run a command with `input` on stdin and capture stdout
pub fn run_with_input(cmd: &Path, args: &[String], input: &[u8]) -> Result<String> {
    log::debug!("exec: {} (stdin {} bytes)", command_line(cmd, args), input.len());
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to execute: {}", command_line(cmd, args)))?;

    let mut stdin = child.stdin.take().context("stdin not captured")?;
    // Feed stdin from a separate thread so a chatty child cannot block us.
    let (output, written) = thread::scope(|s| {
        let writer = s.spawn(move || stdin.write_all(input));
        let output = child.wait_with_output();
        let written = writer
            .join()
            .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")));
        (output, written)
    });
    if let Err(e) = written {
        log::debug!("stdin of {}: {e}", cmd.display());
    }

    let output =
        output.with_context(|| format!("Failed to wait for: {}", command_line(cmd, args)))?;
    checked(cmd, args, output)
}

/// Start a command in the background with its output discarded
pub fn spawn_quiet(cmd: &Path, args: &[String]) -> Result<Child> {
    log::debug!("spawn: {}", command_line(cmd, args));
    Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to start: {}", command_line(cmd, args)))
}

fn checked(cmd: &Path, args: &[String], output: Output) -> Result<String> {
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "Command failed ({}): {}: {}",
            output.status,
            command_line(cmd, args),
            stderr.trim()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_quotes_args() {
        let line = command_line(
            Path::new("kubectl"),
            &["wait".into(), "deploy/app".into(), "a b".into()],
        );
        assert_eq!(line, "kubectl wait deploy/app 'a b'");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_input() {
        let out = run_with_input(Path::new("cat"), &[], b"hello").unwrap();
        assert_eq!(out, "hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_capture_failure() {
        let err = run_capture(Path::new("false"), &[]).unwrap_err();
        assert!(err.to_string().contains("Command failed"));
    }
}
