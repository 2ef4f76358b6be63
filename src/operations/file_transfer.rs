use crate::async_request::{AsyncRequest, AsyncRequestKind, AsyncRequestPayload};
use crate::config::ControlConfig;
use crate::message::Message;
use crate::operation::{OpContext, ReplyText};
use crate::quoting::quote_filename;
use crate::reply_code::ReplyCode;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TransferDirection {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Stage {
    NotStarted,
    CheckingRemoteExistence,
    Transferring,
}

/// What to do about a remote file that already exists at the transfer's destination.
#[derive(Debug, Clone)]
pub enum FileExistsAction {
    Skip,
    Overwrite,
    Rename(String),
    Resume,
}

/// A single file upload or download, parameterized by direction.
///
/// Offset bookkeeping and the "made progress" threshold are grounded directly on the transfer
/// message handling: an upload advances `current_offset` by the reported byte count and only flips
/// `made_progress` once the cumulative count clears the configured threshold past the start
/// offset, guarding against a resumed transfer's replayed low offsets looking like forward
/// progress; a download leaves `current_offset` untouched here (it moves through the `Io*` events
/// instead) and flips `made_progress` the moment any byte at all is acknowledged.
pub struct FileTransferOp {
    pub direction: TransferDirection,
    pub local_path: String,
    pub remote_path: String,
    pub start_offset: i64,
    pub current_offset: i64,
    pub made_progress: bool,
    stage: Stage,
}

impl FileTransferOp {
    pub fn new(direction: TransferDirection, local_path: String, remote_path: String, start_offset: i64) -> FileTransferOp {
        FileTransferOp {
            direction,
            local_path,
            remote_path,
            start_offset,
            current_offset: start_offset,
            made_progress: false,
            stage: Stage::NotStarted,
        }
    }

    pub fn send(&mut self, ctx: &mut OpContext) -> ReplyCode {
        match self.stage {
            Stage::NotStarted => {
                self.stage = Stage::CheckingRemoteExistence;
                ReplyCode::WOULD_BLOCK
            }
            Stage::CheckingRemoteExistence => {
                self.stage = Stage::Transferring;
                let verb = match self.direction {
                    TransferDirection::Upload => "put",
                    TransferDirection::Download => "get",
                };
                let command = format!(
                    "{} {} {} {}",
                    verb,
                    self.start_offset,
                    quote_filename(&self.local_path),
                    quote_filename(&self.remote_path)
                );
                ctx.send_command(&command, None)
            }
            Stage::Transferring => ReplyCode::INTERNAL_ERROR,
        }
    }

    pub fn parse_response(&mut self, _ctx: &mut OpContext, reply: &ReplyText) -> ReplyCode {
        reply.status
    }

    /// Surfaces a remote-file-exists prompt before the transfer actually begins moving bytes.
    pub fn check_remote_existence(&self) -> Option<AsyncRequest> {
        if self.stage != Stage::CheckingRemoteExistence {
            return None;
        }
        Some(AsyncRequest {
            request_id: crate::async_request::RequestId(0),
            kind: AsyncRequestKind::FileExists,
            payload: AsyncRequestPayload::FileExists {
                local_name: self.local_path.clone(),
                remote_name: self.remote_path.clone(),
            },
        })
    }

    pub fn apply_file_exists_decision(&mut self, action: FileExistsAction) -> Option<ReplyCode> {
        match action {
            FileExistsAction::Skip => Some(ReplyCode::OK),
            FileExistsAction::Overwrite => None,
            FileExistsAction::Resume => None,
            FileExistsAction::Rename(new_name) => {
                match self.direction {
                    TransferDirection::Upload => self.remote_path = new_name,
                    TransferDirection::Download => self.local_path = new_name,
                }
                None
            }
        }
    }

    /// Records bytes reported by a `Transfer` message, updating the made-progress flag per the
    /// configured threshold. Uploads advance `current_offset` and only count as having made
    /// progress once they clear the threshold past the start offset; downloads never advance the
    /// offset here (it moves through the `Io*` events instead) and count as having made progress
    /// the instant any byte at all is acknowledged.
    pub fn record_transfer_bytes(&mut self, byte_count: i64, config: &ControlConfig) {
        match self.direction {
            TransferDirection::Upload => {
                self.current_offset += byte_count;
                if !self.made_progress {
                    let transferred = self.current_offset - self.start_offset;
                    if transferred >= config.made_progress_threshold_bytes {
                        self.made_progress = true;
                    }
                }
            }
            TransferDirection::Download => {
                if !self.made_progress && byte_count > 0 {
                    self.made_progress = true;
                }
            }
        }
    }

    /// Acknowledges one of the `Io*` family of messages, which only make sense while a transfer is
    /// actively moving bytes. Purely informational: there is no command in flight to continue, so
    /// this reports `WOULD_BLOCK` rather than `CONTINUE` to avoid `apply_result` calling `send`
    /// again on a transfer that's already mid-flight.
    pub fn handle_io_event(&mut self, _message: &Message) -> ReplyCode {
        ReplyCode::WOULD_BLOCK
    }

    pub fn subcommand_result(&mut self, _ctx: &mut OpContext, previous: ReplyCode) -> ReplyCode {
        previous
    }
}
