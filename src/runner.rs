//! Child process execution.
//!
//! Commands run through the configured shell (`executor argument command`)
//! in their own process group, so a termination signal reaches the whole
//! tree. Two reader tasks stream stdout and stderr into the event channel as
//! line fragments; a watcher task waits for both readers, reaps the child,
//! and reports the exit code tagged with the spawn's run id.

use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::io::AsyncBufReadExt;
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::Config;
use crate::events::Event;

/// Pipe fragments longer than this are delivered as open lines.
const MAX_FRAGMENT: usize = 8 * 1024;

/// Spawns one service command. Returns the child's PID; output, errors, and
/// the eventual exit all arrive on the event channel.
pub fn spawn_service_command(
    config: &Config,
    key: &str,
    run: u64,
    command: &str,
    dir: &Path,
    tx: UnboundedSender<Event>,
) -> Result<u32> {
    let command = transform_command(config, command);
    let mut builder = Command::new(&config.command_executor);
    builder
        .arg(&config.command_argument)
        .arg(&command)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    configure_process_group(&mut builder);

    let mut child = builder
        .spawn()
        .with_context(|| format!("failed to spawn shell for {key}"))?;
    let pid = child.id().unwrap_or(0);

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_task = tokio::spawn(read_pipe(key.to_string(), "stdout", stdout, tx.clone()));
    let err_task = tokio::spawn(read_pipe(key.to_string(), "stderr", stderr, tx.clone()));

    let key = key.to_string();
    tokio::spawn(async move {
        let _ = out_task.await;
        let _ = err_task.await;
        let code = match child.wait().await {
            Ok(status) => status.code().unwrap_or(-1),
            Err(_) => -1,
        };
        let _ = tx.send(Event::ServiceExited { key, run, code });
    });

    Ok(pid)
}

/// Runs one healthcheck attempt after an optional delay and reports the
/// result. The generation lets the controller discard results from a
/// superseded start.
pub fn spawn_healthcheck(
    config: &Config,
    key: &str,
    generation: u64,
    command: &str,
    dir: &Path,
    delay: Option<Duration>,
    tx: UnboundedSender<Event>,
) {
    let mut builder = Command::new(&config.command_executor);
    builder
        .arg(&config.command_argument)
        .arg(command)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    configure_process_group(&mut builder);

    let key = key.to_string();
    tokio::spawn(async move {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let (code, error) = match builder.status().await {
            Ok(status) => (status.code().unwrap_or(-1), None),
            Err(err) => (-1, Some(err.to_string())),
        };
        let _ = tx.send(Event::HealthcheckDone {
            key,
            generation,
            code,
            error,
        });
    });
}

// Reads one pipe, emitting complete lines and, for lines longer than the
// buffer, open fragments. The final unterminated line is delivered closed,
// like a terminal would show it.
async fn read_pipe<R>(key: String, stream_name: &'static str, pipe: Option<R>, tx: UnboundedSender<Event>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return;
    };
    let mut reader = tokio::io::BufReader::with_capacity(MAX_FRAGMENT, pipe);
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let buffered = match reader.fill_buf().await {
            Ok(buffered) => buffered,
            Err(err) => {
                if err.kind() != ErrorKind::BrokenPipe {
                    let _ = tx.send(Event::ServiceOutput {
                        key: key.clone(),
                        text: format!("\x1b[31mError reading {stream_name}: {err}\x1b[0m"),
                        end_line: true,
                    });
                }
                break;
            }
        };
        if buffered.is_empty() {
            if !pending.is_empty() {
                send_fragment(&tx, &key, &mut pending, true);
            }
            break;
        }
        if let Some(newline) = buffered.iter().position(|&b| b == b'\n') {
            pending.extend_from_slice(&buffered[..newline]);
            reader.consume(newline + 1);
            if pending.last() == Some(&b'\r') {
                pending.pop();
            }
            send_fragment(&tx, &key, &mut pending, true);
        } else {
            pending.extend_from_slice(buffered);
            let consumed = buffered.len();
            reader.consume(consumed);
            if pending.len() >= MAX_FRAGMENT {
                send_fragment(&tx, &key, &mut pending, false);
            }
        }
    }
}

fn send_fragment(tx: &UnboundedSender<Event>, key: &str, pending: &mut Vec<u8>, end_line: bool) {
    let text = String::from_utf8_lossy(pending).into_owned();
    pending.clear();
    let _ = tx.send(Event::ServiceOutput {
        key: key.to_string(),
        text,
        end_line,
    });
}

#[cfg(unix)]
fn configure_process_group(command: &mut Command) {
    unsafe {
        command.pre_exec(|| {
            let _ = libc::setpgid(0, 0);
            Ok(())
        });
    }
}

#[cfg(windows)]
fn configure_process_group(command: &mut Command) {
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

/// Sends a stop signal to the child and its process group: SIGTERM (or
/// CTRL_BREAK on Windows) when graceful, SIGKILL (`taskkill /t /f`) when
/// forced.
pub fn terminate(pid: u32, force: bool) -> std::io::Result<()> {
    if pid == 0 {
        return Ok(());
    }
    send_stop_signal(pid, force)
}

#[cfg(unix)]
fn send_stop_signal(pid: u32, force: bool) -> std::io::Result<()> {
    let signal = if force { libc::SIGKILL } else { libc::SIGTERM };
    let pid = pid as i32;
    unsafe {
        let group = libc::kill(-pid, signal);
        let leader = libc::kill(pid, signal);
        if group != 0 && leader != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(windows)]
fn send_stop_signal(pid: u32, force: bool) -> std::io::Result<()> {
    if force {
        let status = std::process::Command::new("taskkill")
            .args(["/t", "/f", "/pid", &pid.to_string()])
            .status()?;
        if !status.success() {
            return Err(std::io::Error::other("taskkill failed"));
        }
        return Ok(());
    }
    use windows_sys::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};
    let ok = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) };
    if ok == 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Commands that ignore the polite stop signal on this platform and must be
/// killed outright.
#[cfg(windows)]
fn platform_kill_patterns() -> &'static [&'static str] {
    // JVM launchers on Windows detach from the console group and survive
    // CTRL_BREAK.
    &[r"\bgradlew?\b", r"\bmvnw?\b", r"\bjava\b"]
}

#[cfg(not(windows))]
fn platform_kill_patterns() -> &'static [&'static str] {
    &[]
}

/// Whether the next termination of `command` must be forced: the command
/// opted in with `kill`, it matches the platform kill-list, or two polite
/// attempts were already made.
pub fn should_force_kill(command: &str, kill_flag: bool, attempts: u32) -> bool {
    if kill_flag || attempts > 2 {
        return true;
    }
    platform_kill_patterns()
        .iter()
        .any(|pattern| match Regex::new(pattern) {
            Ok(regex) => regex.is_match(command),
            Err(_) => false,
        })
}

/// Rewrites Docker Compose invocations to force `--ansi=always`, so compose
/// keeps coloring output even though it is writing to a pipe.
pub fn transform_command(config: &Config, command: &str) -> String {
    if !config.force_docker_compose_ansi {
        return command.to_string();
    }
    force_docker_compose_ansi(command)
}

fn force_docker_compose_ansi(command: &str) -> String {
    let compiled = (
        Regex::new(r"^ *docker[ -]compose +.*$"),
        Regex::new(r"(^\s*docker[ -]compose +.*--ansi)(=| +)(\S+)(.*$)"),
        Regex::new(r"(^ *docker[ -])(compose)( +.*$)"),
    );
    let (Ok(is_compose), Ok(has_ansi_flag), Ok(insert_ansi)) = compiled else {
        return command.to_string();
    };
    if !is_compose.is_match(command) {
        return command.to_string();
    }
    if has_ansi_flag.is_match(command) {
        return has_ansi_flag.replace(command, "${1}=always${4}").into_owned();
    }
    insert_ansi
        .replace(command, "${1}${2} --ansi=always${3}")
        .into_owned()
}
