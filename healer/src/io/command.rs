//! Allow-listed child process execution with timeouts and bounded output.
//!
//! Every external tool invocation in the pipeline goes through [`run`]: the
//! command's leading executable token must match a fixed allow-list before
//! anything is spawned. Repository content can influence *which* of the
//! allowed tools runs, never inject an arbitrary one.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Base names of executables the pipeline may spawn.
const ALLOWED_COMMANDS: &[&str] = &[
    "pytest", "python", "python3", "pip", "pip3", "npm", "node", "npx", "mvn", "git", "flake8",
    "mypy", "eslint",
];

/// Captured result of one command invocation. External failures stay data:
/// a blocked command, timeout, or spawn error all produce a non-zero
/// `exit_code` rather than an `Err`.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandResult {
    fn blocked(command: &str) -> Self {
        Self {
            exit_code: 1,
            stdout: String::new(),
            stderr: format!("Command blocked by security policy: {command}"),
            timed_out: false,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr merged with a newline, both sides trimmed; empty
    /// sides dropped.
    pub fn merged_output(&self) -> String {
        let mut parts = Vec::new();
        if !self.stdout.trim().is_empty() {
            parts.push(self.stdout.trim());
        }
        if !self.stderr.trim().is_empty() {
            parts.push(self.stderr.trim());
        }
        parts.join("\n")
    }
}

/// Split a command string into shell-style tokens (no expansion, quotes
/// honoured). Enough for the fixed command table this pipeline uses.
pub fn split_tokens(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in command.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// True when the command's leading executable (path-stripped base name) is in
/// the allow-list.
pub fn is_allowed(command: &str) -> bool {
    let tokens = split_tokens(command);
    let Some(first) = tokens.first() else {
        return false;
    };
    let base = Path::new(first)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("");
    ALLOWED_COMMANDS.contains(&base)
}

/// Run an allow-listed command in `working_dir` with a timeout.
///
/// Non-allow-listed commands fail closed with a synthetic result and no
/// execution. On timeout the child is killed and the result is non-zero with
/// the timeout marker set; partial output is returned but never trusted as
/// success.
pub fn run(command: &str, working_dir: &Path, timeout: Duration) -> CommandResult {
    if !is_allowed(command) {
        warn!(command, "blocked: not in allow-list");
        return CommandResult::blocked(command);
    }
    run_unchecked(command, working_dir, timeout)
}

/// Run a command inside a container with no network and fixed CPU/memory
/// caps, mounting the workspace at `/workspace`. Falls back transparently to
/// the plain allow-listed runner when the container runtime is unavailable.
pub fn run_sandboxed(
    command: &str,
    workspace: &Path,
    timeout: Duration,
    image: &str,
    memory_limit: &str,
    cpu_limit: &str,
) -> CommandResult {
    let probe = run_unchecked("docker info", workspace, Duration::from_secs(10));
    if !probe.success() {
        warn!("container runtime unavailable, running unsandboxed");
        return run(command, workspace, timeout);
    }

    let docker_cmd = format!(
        "docker run --rm --network=none --memory={memory_limit} --cpus={cpu_limit} \
         -v {}:/workspace -w /workspace {image} {command}",
        workspace.display()
    );
    run_unchecked(&docker_cmd, workspace, timeout)
}

/// Spawn without the allow-list gate. Only the sandbox wrapper and the
/// runner itself use this; callers own the command string entirely.
fn run_unchecked(command: &str, working_dir: &Path, timeout: Duration) -> CommandResult {
    // Log only the executable: clone/push command strings can embed a token.
    let program = split_tokens(command).into_iter().next().unwrap_or_default();
    debug!(program, dir = %working_dir.display(), "running command");
    match spawn_and_wait(command, working_dir, timeout) {
        Ok(result) => {
            if result.exit_code != 0 {
                debug!(program, exit_code = result.exit_code, "command failed");
            }
            result
        }
        Err(err) => {
            warn!(program, err = %err, "command error");
            CommandResult {
                exit_code: 1,
                stdout: String::new(),
                stderr: err.to_string(),
                timed_out: false,
            }
        }
    }
}

fn spawn_and_wait(command: &str, working_dir: &Path, timeout: Duration) -> Result<CommandResult> {
    let tokens = split_tokens(command);
    let (program, args) = tokens
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;

    let mut child = Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawn {program}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    // Drain pipes on reader threads so a chatty child cannot deadlock us.
    let stdout_handle = thread::spawn(move || read_limited(stdout));
    let stderr_handle = thread::spawn(move || read_limited(stderr));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let stdout = join_reader(stdout_handle).context("join stdout")?;
    let stderr = join_reader(stderr_handle).context("join stderr")?;

    let mut exit_code = status.code().unwrap_or(1);
    let mut stderr = stderr;
    if timed_out {
        exit_code = 1;
        stderr = format!("Command timed out after {}s", timeout.as_secs());
    }

    Ok(CommandResult {
        exit_code,
        stdout,
        stderr,
        timed_out,
    })
}

const OUTPUT_LIMIT_BYTES: usize = 200_000;

fn read_limited<R: Read>(mut reader: R) -> Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = OUTPUT_LIMIT_BYTES.saturating_sub(buf.len());
        if remaining > 0 {
            buf.extend_from_slice(&chunk[..n.min(remaining)]);
        }
    }
    Ok(String::from_utf8_lossy(&buf).to_string())
}

fn join_reader(handle: thread::JoinHandle<Result<String>>) -> Result<String> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}
