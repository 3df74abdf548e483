// src/command.rs
use crate::error::{Result, VpnError};
use std::fmt;
use std::future::Future;
use std::io::ErrorKind;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command as TokioCommand};
use tokio::time::{Duration, timeout};

const TERMINATE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    Args(Vec<String>),
    Shell(String),
}

impl CommandLine {
    pub fn args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandLine::Args(args.into_iter().map(Into::into).collect())
    }

    fn program(&self) -> &str {
        match self {
            CommandLine::Args(args) => args.first().map(String::as_str).unwrap_or_default(),
            CommandLine::Shell(_) => "sh",
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandLine::Args(args) => write!(f, "{}", args.join(" ")),
            CommandLine::Shell(script) => write!(f, "{}", script),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub verbose: bool,
    pub dry_run: bool,
    pub timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            dry_run: false,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Executes a single external command and returns its stdout.
///
/// One attempt per call; retry policy belongs to the caller.
pub trait CommandRunner {
    fn run(
        &self,
        command: &CommandLine,
        options: &RunOptions,
    ) -> impl Future<Output = Result<String>> + Send;
}

#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, command: &CommandLine, options: &RunOptions) -> Result<String> {
        if options.dry_run {
            println!("{}", command);
            return Ok(String::new());
        }
        if options.verbose {
            println!("{}", command);
        }

        let mut cmd = match command {
            CommandLine::Args(args) => {
                let Some((program, rest)) = args.split_first() else {
                    return Err(VpnError::CommandNotFound {
                        program: String::new(),
                    });
                };
                let mut cmd = TokioCommand::new(program);
                cmd.args(rest);
                cmd
            }
            CommandLine::Shell(script) => {
                let mut cmd = TokioCommand::new("sh");
                cmd.args(["-c", script.as_str()]);
                cmd
            }
        };
        // Own process group, so a timeout can reach `sudo`, `sh` and whatever they started.
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        log::debug!("running `{}`", command);
        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => VpnError::CommandNotFound {
                program: command.program().to_string(),
            },
            _ => VpnError::Io(e),
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let collect = async {
            tokio::try_join!(child.wait(), read_pipe(stdout), read_pipe(stderr))
        };
        let waited = timeout(options.timeout, collect).await;
        let (status, stdout, stderr) = match waited {
            Ok(output) => output?,
            Err(_) => {
                log::error!("command `{}` timed out after {:?}", command, options.timeout);
                terminate_group(&mut child).await;
                return Err(VpnError::CommandTimeout {
                    command: command.to_string(),
                    timeout: options.timeout,
                });
            }
        };

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr).to_string();
            log::error!("command `{}` gave error: {}", command, stderr.trim_end());
            return Err(VpnError::CommandFailed {
                command: command.to_string(),
                exit_code: status.code(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&stdout).to_string())
    }
}

async fn read_pipe<P: AsyncRead + Unpin>(pipe: Option<P>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Sends SIGTERM to the child's process group and waits for the child to exit,
/// escalating to SIGKILL after `TERMINATE_GRACE`. `sudo` relays SIGTERM to the
/// command it runs; it cannot relay SIGKILL.
async fn terminate_group(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    let group = Pid::from_raw(pid as i32);
    if let Err(e) = killpg(group, Signal::SIGTERM) {
        log::warn!("Failed to send SIGTERM to process group {}: {}", pid, e);
    }
    if timeout(TERMINATE_GRACE, child.wait()).await.is_ok() {
        return;
    }

    log::warn!("Process group {} ignored SIGTERM, killing it", pid);
    if let Err(e) = killpg(group, Signal::SIGKILL) {
        log::warn!("Failed to send SIGKILL to process group {}: {}", pid, e);
    }
    if let Err(e) = child.wait().await {
        log::warn!("Failed to reap process {}: {}", pid, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> RunOptions {
        RunOptions {
            timeout: Duration::from_secs(5),
            ..RunOptions::default()
        }
    }

    #[tokio::test]
    async fn captures_stdout() {
        let out = SystemRunner
            .run(&CommandLine::args(["echo", "de10-wireguard"]), &opts())
            .await
            .unwrap();
        assert_eq!(out, "de10-wireguard\n");
    }

    #[tokio::test]
    async fn shell_string_runs_through_sh() {
        let out = SystemRunner
            .run(&CommandLine::Shell("echo a | tr a b".into()), &opts())
            .await
            .unwrap();
        assert_eq!(out.trim(), "b");
    }

    #[tokio::test]
    async fn non_zero_exit_maps_to_command_failed() {
        let err = SystemRunner
            .run(&CommandLine::Shell("echo oops >&2; exit 3".into()), &opts())
            .await
            .unwrap_err();
        match err {
            VpnError::CommandFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "oops\n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_maps_to_command_not_found() {
        let err = SystemRunner
            .run(
                &CommandLine::args(["mozvpn-test-no-such-binary", "show"]),
                &opts(),
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, VpnError::CommandNotFound { ref program } if program == "mozvpn-test-no-such-binary")
        );
    }

    #[tokio::test]
    async fn dry_run_never_spawns() {
        let options = RunOptions {
            dry_run: true,
            ..opts()
        };
        // Would fail with CommandNotFound if it were spawned.
        let out = SystemRunner
            .run(&CommandLine::args(["mozvpn-test-no-such-binary"]), &options)
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let options = RunOptions {
            timeout: Duration::from_millis(100),
            ..opts()
        };
        let err = SystemRunner
            .run(&CommandLine::args(["sleep", "5"]), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, VpnError::CommandTimeout { .. }));
    }

    fn still_running(pid: i32) -> bool {
        // Gone, or a zombie waiting for init to reap it.
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => !stat
                .rsplit_once(')')
                .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z')),
            Err(_) => false,
        }
    }

    #[tokio::test]
    async fn timeout_terminates_the_whole_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("sleeper.pid");
        let script = format!("sleep 5 & echo $! > {}; wait", pid_file.display());
        let options = RunOptions {
            timeout: Duration::from_millis(300),
            ..opts()
        };

        let err = SystemRunner
            .run(&CommandLine::Shell(script), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, VpnError::CommandTimeout { .. }));

        let pid: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut alive = still_running(pid);
        for _ in 0..20 {
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            alive = still_running(pid);
        }
        assert!(!alive, "background `sleep` {pid} outlived the timed out shell");
    }

    #[test]
    fn displays_as_shell_line() {
        let cmd = CommandLine::args(["sudo", "-n", "wg-quick", "up", "de1-wireguard"]);
        assert_eq!(cmd.to_string(), "sudo -n wg-quick up de1-wireguard");
    }
}
