//! Child-process execution with line streaming.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::secrets::Redactor;

use super::provider::{CommandOutput, OutputEvent};

/// Runs `command` to completion, capturing stdout and stderr line by line.
///
/// Every line is redacted, appended to the captured output and, when a
/// sender is given, pushed to it. The exit code is returned as-is; callers
/// decide whether non-zero is an error.
pub async fn run_streaming(
    mut command: Command,
    output_tx: Option<mpsc::Sender<OutputEvent>>,
    redactor: &Redactor,
) -> Result<CommandOutput> {
    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("stderr was not captured"))?;

    let mut stdout_reader = BufReader::new(stdout);
    let mut stderr_reader = BufReader::new(stderr);
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    let mut sink = output_tx;
    let mut captured_stdout = String::new();
    let mut captured_stderr = String::new();
    let mut stdout_done = false;
    let mut stderr_done = false;

    // `read_until` keeps partial reads in the buffer, so it is safe to
    // cancel inside `select!`. Lines are decoded lossily; invalid UTF-8
    // never stops a pipe from being drained.
    loop {
        tokio::select! {
            read = stdout_reader.read_until(b'\n', &mut stdout_buf), if !stdout_done => {
                match read {
                    Ok(0) => stdout_done = true,
                    Ok(_) => {
                        let line = redactor.redact(&take_line(&mut stdout_buf));
                        captured_stdout.push_str(&line);
                        captured_stdout.push('\n');
                        forward(&mut sink, OutputEvent::Stdout(line)).await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "error reading stdout");
                        stdout_done = true;
                    }
                }
            }
            read = stderr_reader.read_until(b'\n', &mut stderr_buf), if !stderr_done => {
                match read {
                    Ok(0) => stderr_done = true,
                    Ok(_) => {
                        let line = redactor.redact(&take_line(&mut stderr_buf));
                        captured_stderr.push_str(&line);
                        captured_stderr.push('\n');
                        forward(&mut sink, OutputEvent::Stderr(line)).await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "error reading stderr");
                        stderr_done = true;
                    }
                }
            }
            else => break,
        }
    }

    let status = child.wait().await.map_err(Error::Io)?;

    Ok(CommandOutput {
        stdout: captured_stdout,
        stderr: captured_stderr,
        exit_code: status.code().unwrap_or(-1),
    })
}

/// Drains `buf` into a string without its line terminator.
fn take_line(buf: &mut Vec<u8>) -> String {
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    let line = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    line
}

async fn forward(sink: &mut Option<mpsc::Sender<OutputEvent>>, event: OutputEvent) {
    if let Some(tx) = sink {
        if tx.send(event).await.is_err() {
            tracing::warn!("output receiver dropped");
            *sink = None;
        }
    }
}
