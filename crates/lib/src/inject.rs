//! Command injection: type a line into a running `screen` or `tmux` session.
//! No shell is used; the command is passed as a single argument to the multiplexer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Line terminator appended to every injected command.
pub const LINE_TERMINATOR: char = '\r';

pub const DEFAULT_INJECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum InjectionError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} timed out after {:?}; output: {output}", .after)]
    Timeout {
        program: String,
        after: Duration,
        output: String,
    },
    #[error("{program} failed ({status}); output: {output}")]
    Failed {
        program: String,
        status: String,
        output: String,
    },
}

/// Delivers a line of text to a named session.
#[async_trait]
pub trait Injector: Send + Sync {
    async fn inject(&self, session: &str, command: &str) -> Result<(), InjectionError>;
}

/// Terminal multiplexer hosting the target session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Multiplexer {
    #[default]
    Screen,
    Tmux,
}

impl Multiplexer {
    pub fn program(&self) -> &'static str {
        match self {
            Multiplexer::Screen => "screen",
            Multiplexer::Tmux => "tmux",
        }
    }

    /// Arguments that type `keys` into `session` pane `pane`.
    pub fn args(&self, session: &str, pane: u32, keys: &str) -> Vec<String> {
        match self {
            Multiplexer::Screen => vec![
                "-S".to_string(),
                session.to_string(),
                "-p".to_string(),
                pane.to_string(),
                "-X".to_string(),
                "stuff".to_string(),
                keys.to_string(),
            ],
            Multiplexer::Tmux => vec![
                "send-keys".to_string(),
                "-t".to_string(),
                format!("{}:.{}", session, pane),
                "-l".to_string(),
                keys.to_string(),
            ],
        }
    }
}

/// Where and how commands are injected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub name: String,
    pub pane: u32,
    pub multiplexer: Multiplexer,
    pub timeout: Duration,
}

/// Injector that shells out to the multiplexer CLI.
#[derive(Debug, Clone)]
pub struct MultiplexerInjector {
    multiplexer: Multiplexer,
    program: String,
    pane: u32,
    timeout: Duration,
}

impl MultiplexerInjector {
    pub fn new(multiplexer: Multiplexer, pane: u32, timeout: Duration) -> Self {
        Self {
            multiplexer,
            program: multiplexer.program().to_string(),
            pane,
            timeout,
        }
    }

    pub fn for_target(target: &SessionTarget) -> Self {
        Self::new(target.multiplexer, target.pane, target.timeout)
    }

    /// Run a different executable with the same arguments (e.g. an absolute path to `screen`).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl Injector for MultiplexerInjector {
    async fn inject(&self, session: &str, command: &str) -> Result<(), InjectionError> {
        let mut keys = String::with_capacity(command.len() + 1);
        keys.push_str(command);
        keys.push(LINE_TERMINATOR);

        let spawn_err = |source: std::io::Error| InjectionError::Spawn {
            program: self.program.clone(),
            source,
        };
        let mut cmd = Command::new(&self.program);
        cmd.args(self.multiplexer.args(session, self.pane, &keys))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn().map_err(spawn_err)?;
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        // Output read so far survives a timeout.
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let finished = tokio::time::timeout(self.timeout, async {
            let (status, _, _) = tokio::join!(
                child.wait(),
                read_into(stdout_pipe, &mut stdout),
                read_into(stderr_pipe, &mut stderr),
            );
            status
        })
        .await;

        let status = match finished {
            Ok(status) => status.map_err(spawn_err)?,
            Err(_) => {
                let _ = child.start_kill();
                return Err(InjectionError::Timeout {
                    program: self.program.clone(),
                    after: self.timeout,
                    output: combine_output(&stdout, &stderr),
                });
            }
        };
        if status.success() {
            return Ok(());
        }
        Err(InjectionError::Failed {
            program: self.program.clone(),
            status: status.to_string(),
            output: combine_output(&stdout, &stderr),
        })
    }
}

async fn read_into<R: AsyncRead + Unpin>(pipe: Option<R>, buf: &mut Vec<u8>) {
    let Some(mut pipe) = pipe else { return };
    let mut chunk = [0u8; 1024];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// stdout then stderr, newline-separated, trailing whitespace trimmed.
fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut msg = String::from_utf8_lossy(stdout).into_owned();
    let stderr = String::from_utf8_lossy(stderr);
    if !stderr.is_empty() {
        if !msg.is_empty() {
            msg.push('\n');
        }
        msg.push_str(&stderr);
    }
    msg.trim_end().to_string()
}
