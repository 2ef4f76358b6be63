use crate::async_request::AsyncRequestKind;
use crate::command::Command;
use crate::operations::{
    change_dir::ChangeDirOp, chmod::ChmodOp, connect::ConnectOp, delete::DeleteOp,
    file_transfer::FileTransferOp, list::ListOp, mkdir::MkdirOp, remove_dir::RemoveDirOp,
    rename::RenameOp,
};
use crate::process::ChildProcess;
use crate::reply_code::ReplyCode;
use crate::send_buffer::SendBuffer;
use crate::server::EncodingHint;

/// A decoded `Reply`/`Done` line, handed to the top operation's `parse_response`. Passed
/// explicitly rather than stashed in shared mutable state, so the dispatch path stays a plain
/// function call instead of leaning on implicit "current reply" globals.
#[derive(Debug, Clone)]
pub struct ReplyText {
    pub status: ReplyCode,
    pub text: String,
}

/// Shared plumbing every operation body needs to emit a command: the logger, the live helper
/// process handle (absent only during the brief window before `Connect` has spawned one), the
/// outbound byte queue, and the filename encoding the current server negotiated.
pub struct OpContext<'a> {
    pub log: &'a slog::Logger,
    pub process: &'a mut Option<ChildProcess>,
    pub send_buffer: &'a mut SendBuffer,
    pub encoding: &'a EncodingHint,
    pub helper_program: &'a str,
    pub helper_args: &'a [String],
}

impl<'a> OpContext<'a> {
    /// Validates, logs (with password-bearing commands masked), and queues a single command line.
    ///
    /// Per the send-buffer contract: a hard I/O error maps to `ERROR | DISCONNECTED`; embedding a
    /// line terminator in the command text is a programmer error and maps to `INTERNAL_ERROR`; a
    /// custom encoding that cannot represent the command text maps to `ERROR`; otherwise this
    /// returns `WOULD_BLOCK` whether or not the write actually blocked, preserving the
    /// write-then-report-pending behavior noted as an intentional quirk in DESIGN.md.
    pub fn send_command(&mut self, command: &str, masked_echo: Option<&str>) -> ReplyCode {
        if command.contains('\n') || command.contains('\r') {
            return ReplyCode::INTERNAL_ERROR;
        }

        crate::logging::log_line(
            self.log,
            crate::logging::LogLevel::Command,
            masked_echo.unwrap_or(command),
        );

        let encoded = match self.encoding {
            EncodingHint::Utf8 => command.as_bytes().to_vec(),
            EncodingHint::Custom(label) => match encode_custom(label, command) {
                Some(bytes) => bytes,
                None => return ReplyCode::ERROR,
            },
        };

        let was_empty = self.send_buffer.is_empty();
        self.send_buffer.append(&encoded);
        self.send_buffer.append(b"\n");

        if was_empty {
            if let Some(process) = self.process.as_mut() {
                match self.send_buffer.egress(process) {
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(_) => return ReplyCode::ERROR | ReplyCode::DISCONNECTED,
                }
            } else {
                return ReplyCode::INTERNAL_ERROR;
            }
        }

        ReplyCode::WOULD_BLOCK
    }
}

/// Transcodes `text` into the legacy encoding named by `label` (e.g. `"ISO-8859-1"`), returning
/// `None` if the label is unrecognized or the text contains characters the target encoding cannot
/// represent. Mirrors the original `ConvToServer` failing a command outright rather than silently
/// substituting replacement characters into a path sent to a remote filesystem.
fn encode_custom(label: &str, text: &str) -> Option<Vec<u8>> {
    let encoding = encoding_rs::Encoding::for_label(label.as_bytes())?;
    let (bytes, _, had_unmappable) = encoding.encode(text);
    if had_unmappable {
        None
    } else {
        Some(bytes.into_owned())
    }
}

/// The live state of the single in-progress command belonging to each command family, wrapped in
/// a sum type so `ControlSocket` and `OperationStack` can dispatch on it without a trait object.
pub enum OperationBody {
    Connect(ConnectOp),
    List(ListOp),
    ChangeDir(ChangeDirOp),
    FileTransfer(FileTransferOp),
    Delete(DeleteOp),
    RemoveDir(RemoveDirOp),
    Mkdir(MkdirOp),
    Chmod(ChmodOp),
    Rename(RenameOp),
}

impl OperationBody {
    pub fn command(&self) -> Command {
        match self {
            OperationBody::Connect(_) => Command::Connect,
            OperationBody::List(_) => Command::List,
            OperationBody::ChangeDir(_) => Command::ChangeDir,
            OperationBody::FileTransfer(_) => Command::FileTransfer,
            OperationBody::Delete(_) => Command::Delete,
            OperationBody::RemoveDir(_) => Command::RemoveDir,
            OperationBody::Mkdir(_) => Command::Mkdir,
            OperationBody::Chmod(_) => Command::Chmod,
            OperationBody::Rename(_) => Command::Rename,
        }
    }

    pub fn send(&mut self, ctx: &mut OpContext) -> ReplyCode {
        match self {
            OperationBody::Connect(op) => op.send(ctx),
            OperationBody::List(op) => op.send(ctx),
            OperationBody::ChangeDir(op) => op.send(ctx),
            OperationBody::FileTransfer(op) => op.send(ctx),
            OperationBody::Delete(op) => op.send(ctx),
            OperationBody::RemoveDir(op) => op.send(ctx),
            OperationBody::Mkdir(op) => op.send(ctx),
            OperationBody::Chmod(op) => op.send(ctx),
            OperationBody::Rename(op) => op.send(ctx),
        }
    }

    pub fn parse_response(&mut self, ctx: &mut OpContext, reply: &ReplyText) -> ReplyCode {
        match self {
            OperationBody::Connect(op) => op.parse_response(ctx, reply),
            OperationBody::List(op) => op.parse_response(ctx, reply),
            OperationBody::ChangeDir(op) => op.parse_response(ctx, reply),
            OperationBody::FileTransfer(op) => op.parse_response(ctx, reply),
            OperationBody::Delete(op) => op.parse_response(ctx, reply),
            OperationBody::RemoveDir(op) => op.parse_response(ctx, reply),
            OperationBody::Mkdir(op) => op.parse_response(ctx, reply),
            OperationBody::Chmod(op) => op.parse_response(ctx, reply),
            OperationBody::Rename(op) => op.parse_response(ctx, reply),
        }
    }

    pub fn subcommand_result(&mut self, ctx: &mut OpContext, previous: ReplyCode) -> ReplyCode {
        match self {
            OperationBody::Connect(op) => op.subcommand_result(ctx, previous),
            OperationBody::List(op) => op.subcommand_result(ctx, previous),
            OperationBody::ChangeDir(op) => op.subcommand_result(ctx, previous),
            OperationBody::FileTransfer(op) => op.subcommand_result(ctx, previous),
            OperationBody::Delete(op) => op.subcommand_result(ctx, previous),
            OperationBody::RemoveDir(op) => op.subcommand_result(ctx, previous),
            OperationBody::Mkdir(op) => op.subcommand_result(ctx, previous),
            OperationBody::Chmod(op) => op.subcommand_result(ctx, previous),
            OperationBody::Rename(op) => op.subcommand_result(ctx, previous),
        }
    }

    /// `Some` only while this body is a `Connect` awaiting a host-key or password decision;
    /// `ControlSocket`'s message dispatch uses this to decide whether an `Ask*` message is legal
    /// right now.
    pub fn as_connect_mut(&mut self) -> Option<&mut ConnectOp> {
        match self {
            OperationBody::Connect(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut ListOp> {
        match self {
            OperationBody::List(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_file_transfer_mut(&mut self) -> Option<&mut FileTransferOp> {
        match self {
            OperationBody::FileTransfer(op) => Some(op),
            _ => None,
        }
    }
}

/// One frame of the operation stack: the body plus the bookkeeping `ControlSocket` needs without
/// reaching into a specific variant (display name, whether popping it should report completion up
/// to the embedder).
pub struct OperationFrame {
    pub name: String,
    pub top_level: bool,
    pub body: OperationBody,
    /// Set once `ControlSocket` has called `send` on this frame for the first time. Distinguishes
    /// a frame still waiting for an underlying `Connect` to finish (not yet started: gets `send`
    /// called on it once it becomes top-of-stack) from one that already sent a command and is
    /// waiting to absorb a subordinate operation's result via `subcommand_result`.
    pub started: bool,
}

impl OperationFrame {
    pub fn new(name: impl Into<String>, top_level: bool, body: OperationBody) -> OperationFrame {
        OperationFrame { name: name.into(), top_level, body, started: false }
    }
}

/// Kinds of asynchronous request a `Connect` operation in particular can legally have outstanding.
pub fn connect_request_kinds() -> [AsyncRequestKind; 3] {
    [AsyncRequestKind::Hostkey, AsyncRequestKind::HostkeyChanged, AsyncRequestKind::InteractiveLogin]
}
