use std::{
    fs::File,
    io::Read,
    path::Path,
    process::{Command, Stdio},
    thread,
};

use anyhow::{Context, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl RunOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == 0
    }

    #[must_use]
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    #[must_use]
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Execute a program and capture stdout/stderr as raw bytes.
///
/// Blocks until the program exits; there is no deadline.
///
/// # Errors
///
/// Returns an error when the program cannot be spawned or its output streams
/// cannot be read entirely.
pub fn run_command(program: &Path, args: &[String]) -> Result<RunOutput> {
    run_command_with_input(program, args, None)
}

/// Like [`run_command`], feeding `input` to the program's stdin.
///
/// # Errors
///
/// Returns an error when the program cannot be spawned or its output streams
/// cannot be read entirely.
pub fn run_command_with_input(
    program: &Path,
    args: &[String],
    input: Option<File>,
) -> Result<RunOutput> {
    let mut command = Command::new(program);
    command.args(args);
    command.stdin(input.map_or_else(Stdio::null, Stdio::from));
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to start {}", program.display()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("stdout missing for {}", program.display()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("stderr missing for {}", program.display()))?;
    let stdout_handle = thread::spawn(move || read_all(stdout));
    let stderr_handle = thread::spawn(move || read_all(stderr));

    let status = child
        .wait()
        .with_context(|| format!("failed to wait for {}", program.display()))?;
    let stdout = stdout_handle
        .join()
        .map_err(|_| anyhow::anyhow!("stdout thread panicked"))??;
    let stderr = stderr_handle
        .join()
        .map_err(|_| anyhow::anyhow!("stderr thread panicked"))??;
    Ok(RunOutput {
        code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

fn read_all(mut reader: impl Read) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer)?;
    Ok(buffer)
}
