//! Authorization and command parsing for inbound chat messages.
//!
//! Pure decision logic: no I/O, no logging. The dispatcher acts on the result.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Character that marks a message as a command for the session.
pub const COMMAND_PREFIX: char = '!';

/// Reserved command that is refused for every sender in extended mode.
pub const RESERVED_HELP: &str = "help";

/// Reserved command that triggers the stop / wait / start sequence in extended mode.
pub const RESERVED_RESTART: &str = "restart";

/// Sender ids allowed to issue commands. Static for the process lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    ids: HashSet<i64>,
}

impl AllowList {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Allow-list with a single admin.
    pub fn single(id: i64) -> Self {
        Self::new([id])
    }

    pub fn contains(&self, sender: i64) -> bool {
        self.ids.contains(&sender)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Baseline outcome of authorizing and parsing a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Sender is not on the allow-list.
    Unauthorized,
    /// Authorized sender, but the text is not a command.
    Plain,
    /// Authorized command; the body has the prefix stripped and is otherwise verbatim.
    Command(String),
}

/// Authorize `sender` against `allow` and extract the command body from `text`.
///
/// Exactly one leading prefix is removed; an empty body is still a command.
pub fn decide(sender: i64, text: &str, allow: &AllowList) -> Decision {
    if !allow.contains(sender) {
        return Decision::Unauthorized;
    }
    match text.strip_prefix(COMMAND_PREFIX) {
        Some(body) => Decision::Command(body.to_string()),
        None => Decision::Plain,
    }
}

/// Which command set the relay accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandMode {
    /// Every authorized command is injected as-is.
    #[default]
    Basic,
    /// `help` is blocked for everyone and `restart` runs the restart sequence.
    Extended,
}

impl std::str::FromStr for CommandMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(CommandMode::Basic),
            "extended" => Ok(CommandMode::Extended),
            other => Err(format!("unknown command mode: {}", other)),
        }
    }
}

/// Final verdict for an inbound message, after reserved-command handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Unauthorized,
    Plain,
    /// Reserved command refused regardless of who sent it.
    Blocked(String),
    /// Authorized `restart`.
    Restart,
    /// Authorized command to inject verbatim.
    Inject(String),
}

/// Allow-list plus command mode.
#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    allow: AllowList,
    mode: CommandMode,
}

impl CommandPolicy {
    pub fn new(allow: AllowList, mode: CommandMode) -> Self {
        Self { allow, mode }
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow
    }

    pub fn mode(&self) -> CommandMode {
        self.mode
    }

    pub fn evaluate(&self, sender: i64, text: &str) -> Verdict {
        if self.mode == CommandMode::Extended {
            if let Some(body) = text.strip_prefix(COMMAND_PREFIX) {
                if is_reserved(body, RESERVED_HELP) {
                    return Verdict::Blocked(body.to_string());
                }
            }
        }
        match decide(sender, text, &self.allow) {
            Decision::Unauthorized => Verdict::Unauthorized,
            Decision::Plain => Verdict::Plain,
            Decision::Command(body) => {
                if self.mode == CommandMode::Extended && is_reserved(&body, RESERVED_RESTART) {
                    Verdict::Restart
                } else {
                    Verdict::Inject(body)
                }
            }
        }
    }
}

/// True if the first word of `body` is `name` (ASCII case-insensitive).
fn is_reserved(body: &str, name: &str) -> bool {
    body.split_whitespace()
        .next()
        .is_some_and(|word| word.eq_ignore_ascii_case(name))
}
