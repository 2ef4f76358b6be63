use crate::operation::{OpContext, ReplyText};
use crate::process::ChildProcess;
use crate::reply_code::ReplyCode;
use crate::server::{Credentials, Server};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Stage {
    NotStarted,
    AwaitingOpen,
}

/// Establishes a session with the helper: spawns it if necessary, sends the `open` command, then
/// idles while `ControlSocket`'s message dispatch handles whatever host-key or password prompts
/// arrive before the final `Done`.
///
/// Owns the `Server`/`Credentials` pair for the operation's lifetime, per the data model: a
/// connect in progress is the only place these live, and they are dropped once the stack frame
/// pops.
pub struct ConnectOp {
    pub server: Server,
    pub credentials: Credentials,
    stage: Stage,
    /// Set by `ControlSocket` itself when a hostkey prompt was answered "untrusted": there is no
    /// error result to carry that decision back through (the `send_command` queuing the rejection
    /// line reports `WOULD_BLOCK`), so this flag is what the *next* `Reply`/`Done` for this connect
    /// checks to force a close instead of completing normally. A parse-level error needs no such
    /// flag — `apply_result`'s own "any connect error closes the socket" rule already covers it in
    /// the same call that observes it.
    pub critical_failure: bool,
    /// Text carried by the most recent `RequestPreamble`/`RequestInstruction` lines, consumed by
    /// the next `AskPassword` they precede.
    pending_preamble: Option<String>,
    pending_instruction: Option<String>,
    /// Whether the currently outstanding `InteractiveLogin` prompt is an SSH key passphrase
    /// (as opposed to the server's own login prompt) — decides whether a reply overwrites
    /// `credentials.password`.
    pending_is_keyfile: bool,
    /// The `preamble\ninstruction\nprompt` identity of the last password challenge seen, plus
    /// whether it was a key-file prompt. Lets a repeated non-interactive prompt be recognized as
    /// an authentication failure instead of retried forever, while a key-file passphrase prompt
    /// followed by the server's own login prompt is not mistaken for a repeat of the same
    /// challenge.
    last_challenge_identifier: Option<String>,
    last_challenge_is_keyfile: bool,
}

impl ConnectOp {
    pub fn new(server: Server, credentials: Credentials) -> ConnectOp {
        ConnectOp {
            server,
            credentials,
            stage: Stage::NotStarted,
            critical_failure: false,
            pending_preamble: None,
            pending_instruction: None,
            pending_is_keyfile: false,
            last_challenge_identifier: None,
            last_challenge_is_keyfile: false,
        }
    }

    pub fn set_preamble(&mut self, text: String) {
        self.pending_preamble = Some(text);
    }

    pub fn set_instruction(&mut self, text: String) {
        self.pending_instruction = Some(text);
    }

    /// Consumes whatever preamble/instruction text is pending, defaulting to empty strings —
    /// a helper may legitimately ask for a password with neither set.
    pub fn take_challenge_context(&mut self) -> (String, String) {
        (self.pending_preamble.take().unwrap_or_default(), self.pending_instruction.take().unwrap_or_default())
    }

    pub fn pending_is_keyfile(&self) -> bool {
        self.pending_is_keyfile
    }

    pub fn set_pending_is_keyfile(&mut self, value: bool) {
        self.pending_is_keyfile = value;
    }

    pub fn last_challenge_identifier(&self) -> Option<&str> {
        self.last_challenge_identifier.as_deref()
    }

    pub fn last_challenge_is_keyfile(&self) -> bool {
        self.last_challenge_is_keyfile
    }

    pub fn set_last_challenge(&mut self, identifier: String, is_keyfile: bool) {
        self.last_challenge_identifier = Some(identifier);
        self.last_challenge_is_keyfile = is_keyfile;
    }

    pub fn send(&mut self, ctx: &mut OpContext) -> ReplyCode {
        match self.stage {
            Stage::NotStarted => {
                if ctx.process.is_none() {
                    match ChildProcess::spawn(ctx.helper_program, ctx.helper_args) {
                        Ok(process) => *ctx.process = Some(process),
                        Err(_) => return ReplyCode::ERROR | ReplyCode::DISCONNECTED,
                    }
                }
                self.stage = Stage::AwaitingOpen;
                let command = format!("open {} {}", self.server.host, self.server.port);
                ctx.send_command(&command, None)
            }
            Stage::AwaitingOpen => ReplyCode::INTERNAL_ERROR,
        }
    }

    pub fn parse_response(&mut self, _ctx: &mut OpContext, reply: &ReplyText) -> ReplyCode {
        reply.status
    }

    pub fn subcommand_result(&mut self, _ctx: &mut OpContext, previous: ReplyCode) -> ReplyCode {
        previous
    }
}
