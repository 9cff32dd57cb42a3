use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Run `command` with `input` on stdin and return its stdout.
///
/// Fails when the process exits unsuccessfully; stderr is included in the
/// error.
pub async fn run_piped(mut command: Command, input: Vec<u8>, what: &str) -> Result<Vec<u8>> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to run {}", what))?;

    let mut stdin = child
        .stdin
        .take()
        .with_context(|| format!("{} stdin was not captured", what))?;
    let writer = tokio::spawn(async move {
        let result = stdin.write_all(&input).await;
        drop(stdin);
        result
    });

    let output = child.wait_with_output().await?;
    let written = writer.await?;

    if !output.status.success() {
        bail!(
            "{} failed ({}): {}",
            what,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    written.with_context(|| format!("Failed to write to {}", what))?;
    Ok(output.stdout)
}

/// A configured command line, run through `sh -c`.
pub fn shell(command_line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(command_line);
    command
}
