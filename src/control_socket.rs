use std::io::{self, Write};
use std::time::{Duration, Instant};

use crate::async_request::{AsyncRequest, AsyncRequestKind, AsyncRequestPayload, AsyncRequestRegistry, RequestId};
use crate::command::Command;
use crate::config::ControlConfig;
use crate::encryption::EncryptionDetails;
use crate::logging::{self, LogLevel, Logger};
use crate::message::{Message, MessageKind};
use crate::operation::{OpContext, OperationBody, OperationFrame, ReplyText};
use crate::operations::change_dir::ChangeDirOp;
use crate::operations::chmod::ChmodOp;
use crate::operations::connect::ConnectOp;
use crate::operations::delete::DeleteOp;
use crate::operations::file_transfer::{FileExistsAction, FileTransferOp, TransferDirection};
use crate::operations::list::{ListFlags, ListOp};
use crate::operations::mkdir::{MkdirFlags, MkdirOp};
use crate::operations::remove_dir::RemoveDirOp;
use crate::operations::rename::RenameOp;
use crate::op_stack::OperationStack;
use crate::parser::{InputParser, ParserError, ParserEvent};
use crate::process::{ChildProcess, ProcessEvent};
use crate::rate_limiter::{Direction, Grant, RateBucket, SharedRateLimiter};
use crate::reply_code::ReplyCode;
use crate::send_buffer::SendBuffer;
use crate::server::{Credentials, EncodingHint, LogonType, Server};

/// Callback surface a `ControlSocket` drives into: the owning application decides how prompts
/// reach a human, how transfer progress is surfaced, and what happens when an operation finally
/// resolves. Kept as a trait rather than a concrete struct so the control socket itself stays
/// free of UI concerns, mirroring how the teacher's `Endpoint` reports connection changes through
/// a plain drained iterator rather than owning a UI.
pub trait Engine {
    fn send_async_request(&mut self, request: AsyncRequest);
    fn record_activity(&mut self, direction: Direction, bytes: u64);
    fn transfer_status_update(&mut self, offset: i64);
    fn transfer_status_set_made_progress(&mut self);
    fn operation_finished(&mut self, command: Command, result: ReplyCode);
}

/// Decision for a host-key prompt.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HostkeyTrust {
    Untrusted,
    AlwaysTrust,
    Once,
}

/// A UI's answer to one previously-issued `AsyncRequest`.
pub enum AsyncReply {
    Hostkey { request_id: RequestId, trust: HostkeyTrust },
    InteractiveLogin { request_id: RequestId, password: Option<String> },
    FileExists { request_id: RequestId, action: FileExistsAction },
}

/// One unit of work delivered to [`ControlSocket::dispatch`]. `Sftp`/`SftpList` carry the
/// generation the producing helper connection was in, so a close that races with in-flight events
/// from the connection it just tore down does not resurrect state for a session that no longer
/// exists (the "stale generation" concern the spec calls out explicitly).
pub enum SocketEvent {
    Sftp(Message, u64),
    SftpList(crate::message::ListEntry, u64),
    ProcessClosed,
    LineTooLong,
    /// A helper line could not be decoded in the server's negotiated custom encoding.
    InvalidEncoding,
    /// A rate bucket refilled while a quota request was deferred empty-handed; equivalent to
    /// receiving another `UsedQuotaRecv`/`UsedQuotaSend` for the same direction.
    RateAvailable(Direction),
}

pub struct FileTransferRequest {
    pub direction: TransferDirection,
    pub local_path: String,
    pub remote_path: String,
    pub start_offset: i64,
}

pub struct ChmodRequest {
    pub path: String,
    pub permissions: String,
}

pub struct RenameRequest {
    pub from_path: String,
    pub to_path: String,
}

/// The `-Db,limit\n` bandwidth-grant line reported to the helper: `bytes` granted plus the
/// configured per-second `limit` the helper can use to pace itself.
fn quota_grant_line(digit: u8, bytes: u64, limit: u64) -> String {
    format!("-{}{},{}\n", digit, bytes, limit)
}

fn parse_done_status(field: Option<&str>) -> ReplyCode {
    match field.unwrap_or("") {
        "OK" => ReplyCode::OK,
        "ERROR" => ReplyCode::ERROR,
        "ERROR_DISCONNECTED" => ReplyCode::ERROR | ReplyCode::DISCONNECTED,
        "ERROR_PASSWORD_FAILED" => ReplyCode::ERROR | ReplyCode::PASSWORD_FAILED,
        "ERROR_TIMEOUT" => ReplyCode::ERROR | ReplyCode::TIMEOUT,
        "CRITICAL" => ReplyCode::CRITICAL_ERROR,
        "CANCELED" => ReplyCode::CANCELED,
        "NOT_CONNECTED" => ReplyCode::NOT_CONNECTED,
        // An unrecognized status token fails safe rather than being treated as success.
        _ => ReplyCode::ERROR,
    }
}


/// Drives a single long-lived SFTP helper process through a stack of in-progress operations.
///
/// This is the crate's central state machine, grounded on the teacher's `Endpoint`: one object
/// owning exactly one I/O source, polled explicitly by its caller rather than by an internal
/// thread, with every state transition a plain synchronous function call. There is no locking
/// anywhere in this type — per the concurrency model, a `ControlSocket` is only ever driven by
/// one thread at a time, cooperatively.
pub struct ControlSocket<E: Engine> {
    engine: E,
    log: Logger,
    config: ControlConfig,
    process: Option<ChildProcess>,
    input_parser: Option<InputParser>,
    send_buffer: SendBuffer,
    stack: OperationStack,
    async_requests: AsyncRequestRegistry,
    rate_recv: RateBucket,
    rate_send: RateBucket,
    /// Set while a quota request went unanswered because its bucket was empty; cleared (and
    /// retried) the next time that bucket refills.
    quota_pending_recv: bool,
    quota_pending_send: bool,
    encryption: EncryptionDetails,
    last_server: Option<Server>,
    last_credentials: Option<Credentials>,
    encoding: EncodingHint,
    generation: u64,
    helper_program: String,
    helper_args: Vec<String>,
}

impl<E: Engine> ControlSocket<E> {
    pub fn new(engine: E, log: Logger, config: ControlConfig, helper_program: String, helper_args: Vec<String>) -> ControlSocket<E> {
        let chunk_max = config.rate_limiter_chunk_max_bytes;
        let now = Instant::now();
        ControlSocket {
            engine,
            log,
            config,
            process: None,
            input_parser: None,
            send_buffer: SendBuffer::new(),
            stack: OperationStack::new(),
            async_requests: AsyncRequestRegistry::new(),
            rate_recv: RateBucket::new(chunk_max, now),
            rate_send: RateBucket::new(chunk_max, now),
            quota_pending_recv: false,
            quota_pending_send: false,
            encryption: EncryptionDetails::default(),
            last_server: None,
            last_credentials: None,
            encoding: EncodingHint::Utf8,
            generation: 0,
            helper_program,
            helper_args,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.process.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn encryption_details(&self) -> &EncryptionDetails {
        &self.encryption
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    // ---- public command surface -------------------------------------------------------------

    pub fn connect(&mut self, server: Server, credentials: Credentials) {
        self.last_server = Some(server.clone());
        self.last_credentials = Some(credentials.clone());
        self.encoding = server.encoding.clone();
        let frame = OperationFrame::new(Command::Connect.name(), true, OperationBody::Connect(ConnectOp::new(server, credentials)));
        self.push_operation(frame);
    }

    pub fn list(&mut self, path: String, sub_dir: Option<String>, flags: ListFlags) {
        let frame = OperationFrame::new(Command::List.name(), true, OperationBody::List(ListOp::new(path, sub_dir, flags)));
        self.push_operation(frame);
    }

    pub fn change_dir(&mut self, path: String, sub_dir: Option<String>, link_discovery: bool) {
        let frame = OperationFrame::new(
            Command::ChangeDir.name(),
            true,
            OperationBody::ChangeDir(ChangeDirOp::new(path, sub_dir, link_discovery)),
        );
        self.push_operation(frame);
    }

    pub fn file_transfer(&mut self, request: FileTransferRequest) {
        let op = FileTransferOp::new(request.direction, request.local_path, request.remote_path, request.start_offset);
        let frame = OperationFrame::new(Command::FileTransfer.name(), true, OperationBody::FileTransfer(op));
        self.push_operation(frame);
    }

    pub fn delete(&mut self, path: String, files: Vec<String>) {
        let frame = OperationFrame::new(Command::Delete.name(), true, OperationBody::Delete(DeleteOp::new(path, files)));
        self.push_operation(frame);
    }

    pub fn remove_dir(&mut self, path: String, sub_dir: Option<String>) {
        let frame = OperationFrame::new(Command::RemoveDir.name(), true, OperationBody::RemoveDir(RemoveDirOp::new(path, sub_dir)));
        self.push_operation(frame);
    }

    pub fn mkdir(&mut self, path: String, flags: MkdirFlags) {
        let frame = OperationFrame::new(Command::Mkdir.name(), true, OperationBody::Mkdir(MkdirOp::new(path, flags)));
        self.push_operation(frame);
    }

    pub fn chmod(&mut self, request: ChmodRequest) {
        let frame = OperationFrame::new(Command::Chmod.name(), true, OperationBody::Chmod(ChmodOp::new(request.path, request.permissions)));
        self.push_operation(frame);
    }

    pub fn rename(&mut self, request: RenameRequest) {
        let frame = OperationFrame::new(Command::Rename.name(), true, OperationBody::Rename(RenameOp::new(request.from_path, request.to_path)));
        self.push_operation(frame);
    }

    /// Cancels whatever is on top of the stack by tearing the whole connection down: a best-effort
    /// `cancel` line is written if the helper is still reachable, then the helper is killed, the
    /// parser and send buffer are dropped, and every stacked operation is unwound reporting
    /// `CANCELED`, without waiting for the helper to answer the line. Client-side and immediate
    /// rather than a confirmed round trip. See DESIGN.md for why this departs from the teacher's
    /// more elaborate deferred cancellation.
    pub fn cancel(&mut self) {
        if self.stack.is_empty() {
            return;
        }
        if let Some(process) = self.process.as_mut() {
            let _ = process.write(b"cancel\n");
        }
        self.do_close(ReplyCode::CANCELED);
    }

    pub fn set_async_request_reply(&mut self, reply: AsyncReply) {
        match reply {
            AsyncReply::Hostkey { request_id, trust } => self.reply_hostkey(request_id, trust),
            AsyncReply::InteractiveLogin { request_id, password } => self.reply_interactive_login(request_id, password),
            AsyncReply::FileExists { request_id, action } => self.reply_file_exists(request_id, action),
        }
    }

    pub fn set_rate_limit(&mut self, direction: Direction, limit: Option<u64>) {
        let now = Instant::now();
        match direction {
            Direction::Inbound => self.rate_recv.set_limit(limit, now),
            Direction::Outbound => self.rate_send.set_limit(limit, now),
        }
    }

    /// Joins this socket's bucket for `direction` to a pool shared across however many other
    /// sockets an embedder also attaches to it, so the combined total across all of them never
    /// exceeds the pool's own configured cap.
    pub fn attach_rate_limiter(&mut self, direction: Direction, limiter: SharedRateLimiter) {
        match direction {
            Direction::Inbound => self.rate_recv.attach_child(limiter),
            Direction::Outbound => self.rate_send.attach_child(limiter),
        }
    }

    /// Leaves whatever shared pool this socket's bucket for `direction` was attached to.
    pub fn detach_rate_limiter(&mut self, direction: Direction) {
        match direction {
            Direction::Inbound => self.rate_recv.detach(),
            Direction::Outbound => self.rate_send.detach(),
        }
    }

    /// Periodic bookkeeping: refills both rate buckets. Grounded on the teacher's
    /// `Endpoint::housekeeping`, run once per reactor tick regardless of whether any I/O was
    /// ready.
    pub fn housekeeping(&mut self, now: Instant) {
        let interval = Duration::from_secs(self.config.housekeeping_interval_secs);
        self.rate_recv.refill(now, interval);
        self.rate_recv.refill_parent(now, interval);
        self.rate_send.refill(now, interval);
        self.rate_send.refill_parent(now, interval);
        if self.quota_pending_recv {
            self.dispatch(SocketEvent::RateAvailable(Direction::Inbound));
        }
        if self.quota_pending_send {
            self.dispatch(SocketEvent::RateAvailable(Direction::Outbound));
        }
    }

    // ---- event production and dispatch -------------------------------------------------------

    /// Polls the helper's stdio pipes without blocking and translates whatever is ready into
    /// queued events, flushing the send buffer opportunistically along the way. The caller is
    /// expected to feed the result into [`ControlSocket::dispatch`] in order.
    pub fn poll_process(&mut self) -> io::Result<Vec<SocketEvent>> {
        let mut out = Vec::new();
        if self.process.is_none() {
            return Ok(out);
        }
        if self.input_parser.is_none() {
            self.input_parser = Some(InputParser::new(self.config.max_reply_line_bytes, self.log.clone()));
        }

        let events = self.process.as_mut().unwrap().poll_events()?;
        for event in events {
            match event {
                ProcessEvent::Writable => {
                    let flushed = {
                        let process = self.process.as_mut().unwrap();
                        self.send_buffer.egress(process)
                    };
                    if let Err(e) = flushed {
                        if e.kind() != io::ErrorKind::WouldBlock {
                            out.push(SocketEvent::ProcessClosed);
                        }
                    }
                }
                ProcessEvent::Readable => self.drain_readable(&mut out),
            }
        }
        Ok(out)
    }

    fn drain_readable(&mut self, out: &mut Vec<SocketEvent>) {
        let mut buf = [0u8; 4096];
        loop {
            let read_result = self.process.as_mut().unwrap().read(&mut buf);
            match read_result {
                Ok(0) => {
                    out.push(SocketEvent::ProcessClosed);
                    break;
                }
                Ok(n) => {
                    let encoding = self.encoding.clone();
                    match self.input_parser.as_mut().unwrap().on_data(&buf[..n], &encoding) {
                        Ok(parser_events) => {
                            for pe in parser_events {
                                match pe {
                                    ParserEvent::Message(m) => out.push(SocketEvent::Sftp(m, self.generation)),
                                    ParserEvent::ListEntry(e) => out.push(SocketEvent::SftpList(e, self.generation)),
                                }
                            }
                        }
                        Err(ParserError::LineTooLong) => {
                            out.push(SocketEvent::LineTooLong);
                            break;
                        }
                        Err(ParserError::InvalidEncoding) => {
                            out.push(SocketEvent::InvalidEncoding);
                            break;
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => {
                    out.push(SocketEvent::ProcessClosed);
                    break;
                }
            }
        }
    }

    pub fn dispatch(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Sftp(msg, generation) => {
                if generation != self.generation {
                    logging::log_line(&self.log, LogLevel::DebugVerbose, "dropping event from a superseded connection");
                    return;
                }
                self.handle_message(msg);
            }
            SocketEvent::SftpList(entry, generation) => {
                if generation != self.generation {
                    return;
                }
                match self.stack.top_mut().and_then(|f| f.body.as_list_mut()) {
                    Some(list) => list.push_entry(entry),
                    None => logging::log_line(&self.log, LogLevel::DebugWarning, "list entry with no active list operation"),
                }
            }
            SocketEvent::ProcessClosed => self.do_close(ReplyCode::ERROR | ReplyCode::DISCONNECTED),
            SocketEvent::LineTooLong => self.do_close(ReplyCode::ERROR | ReplyCode::DISCONNECTED),
            SocketEvent::InvalidEncoding => self.do_close(ReplyCode::ERROR | ReplyCode::DISCONNECTED),
            SocketEvent::RateAvailable(direction) => self.on_quota_request(direction),
        }
    }

    // ---- message handling -------------------------------------------------------------------

    fn handle_message(&mut self, msg: Message) {
        match msg.kind {
            // A bare `Reply` line carries no status code of its own; the helper uses it for
            // commands that either succeed immediately or not at all, so it is treated as an
            // implicit `Ok` completion of whatever is on top of the stack right now.
            MessageKind::Reply => {
                let text = msg.field(0).unwrap_or("").to_string();
                logging::log_line(&self.log, LogLevel::Reply, &text);
                self.finish_current_command(ReplyCode::OK, text);
            }
            MessageKind::Done => {
                let status = parse_done_status(msg.field(0));
                self.finish_current_command(status, String::new());
            }
            MessageKind::Error => logging::log_line(&self.log, LogLevel::Error, &msg.fields.join(" ")),
            MessageKind::Verbose => logging::log_line(&self.log, LogLevel::DebugVerbose, &msg.fields.join(" ")),
            MessageKind::Info => logging::log_line(&self.log, LogLevel::DebugInfo, &msg.fields.join(" ")),
            MessageKind::Status => logging::log_line(&self.log, LogLevel::Status, &msg.fields.join(" ")),
            MessageKind::Recv => {
                if let Some(bytes) = msg.field(0).and_then(|s| s.parse::<u64>().ok()) {
                    self.engine.record_activity(Direction::Inbound, bytes);
                }
            }
            MessageKind::Send => {
                if let Some(bytes) = msg.field(0).and_then(|s| s.parse::<u64>().ok()) {
                    self.engine.record_activity(Direction::Outbound, bytes);
                }
            }
            MessageKind::Transfer => self.handle_transfer_message(&msg),
            MessageKind::RequestPreamble => {
                let text = msg.field(0).unwrap_or("").to_string();
                if let Some(connect) = self.stack.top_mut().and_then(|f| f.body.as_connect_mut()) {
                    connect.set_preamble(text);
                }
            }
            MessageKind::RequestInstruction => {
                let text = msg.field(0).unwrap_or("").to_string();
                if let Some(connect) = self.stack.top_mut().and_then(|f| f.body.as_connect_mut()) {
                    connect.set_instruction(text);
                }
            }
            MessageKind::AskHostkey | MessageKind::AskHostkeyChanged => self.handle_hostkey_prompt(&msg),
            MessageKind::AskHostkeyBetteralg => {
                logging::log_line(&self.log, LogLevel::Error, "got a hostkey algorithm upgrade request outside normal flow, aborting connection");
                self.do_close(ReplyCode::INTERNAL_ERROR);
            }
            MessageKind::AskPassword => self.handle_password_prompt(&msg),
            MessageKind::UsedQuotaRecv => self.on_quota_request(Direction::Inbound),
            MessageKind::UsedQuotaSend => self.on_quota_request(Direction::Outbound),
            MessageKind::KexAlgorithm => self.encryption.kex_algorithm = msg.field(0).map(String::from),
            MessageKind::KexHash => self.encryption.kex_hash = msg.field(0).map(String::from),
            MessageKind::KexCurve => self.encryption.kex_curve = msg.field(0).map(String::from),
            MessageKind::CipherClientToServer => self.encryption.cipher_client_to_server = msg.field(0).map(String::from),
            MessageKind::CipherServerToClient => self.encryption.cipher_server_to_client = msg.field(0).map(String::from),
            MessageKind::MacClientToServer => self.encryption.mac_client_to_server = msg.field(0).map(String::from),
            MessageKind::MacServerToClient => self.encryption.mac_server_to_client = msg.field(0).map(String::from),
            MessageKind::Hostkey => self.encryption.set_hostkey(&msg.fields.join(" ")),
            MessageKind::IoNextbuf | MessageKind::IoOpen | MessageKind::IoSize | MessageKind::IoFinalize => {
                self.handle_io_message(&msg);
            }
        }
    }

    fn handle_transfer_message(&mut self, msg: &Message) {
        let byte_count: i64 = msg.field(0).and_then(|s| s.parse().ok()).unwrap_or(0);
        let outcome = match self.stack.top_mut().and_then(|f| f.body.as_file_transfer_mut()) {
            Some(transfer) => {
                let was_progress = transfer.made_progress;
                transfer.record_transfer_bytes(byte_count, &self.config);
                Some((transfer.direction, transfer.current_offset, was_progress, transfer.made_progress))
            }
            None => None,
        };
        match outcome {
            Some((direction, offset, was_progress, made_progress)) => {
                // A download's offset moves through the `Io*` events instead; only an upload's
                // cumulative byte count is meaningful here.
                if direction == TransferDirection::Upload {
                    self.engine.transfer_status_update(offset);
                }
                // Only the false-to-true transition is a notification; once flipped, repeating it
                // on every subsequent `Transfer` message for the rest of a multi-gigabyte transfer
                // would be both wasted work and a misleading repeated event.
                if made_progress && !was_progress {
                    self.engine.transfer_status_set_made_progress();
                }
            }
            None => logging::log_line(&self.log, LogLevel::DebugWarning, "transfer message with no active transfer"),
        }
    }

    fn handle_io_message(&mut self, msg: &Message) {
        let result = self.stack.top_mut().and_then(|f| f.body.as_file_transfer_mut()).map(|t| t.handle_io_event(msg));
        match result {
            Some(code) => self.apply_result(code),
            None => logging::log_line(&self.log, LogLevel::DebugWarning, "io message with no active transfer"),
        }
    }

    /// Answers a bandwidth request from the helper: an unlimited bucket always grants in full, an
    /// empty one defers the request until the next refill, and any other bucket grants what it can
    /// and reports both the grant and the configured limit so the helper can pace itself.
    fn on_quota_request(&mut self, direction: Direction) {
        match direction {
            Direction::Inbound => self.quota_pending_recv = false,
            Direction::Outbound => self.quota_pending_send = false,
        }
        if self.process.is_none() {
            return;
        }
        let digit = match direction {
            Direction::Inbound => 0,
            Direction::Outbound => 1,
        };
        let grant = match direction {
            Direction::Inbound => self.rate_recv.request(),
            Direction::Outbound => self.rate_send.request(),
        };
        match grant {
            Grant::Unlimited => self.queue_line(&format!("-{}-\n", digit)),
            Grant::Empty => match direction {
                Direction::Inbound => self.quota_pending_recv = true,
                Direction::Outbound => self.quota_pending_send = true,
            },
            Grant::Bytes(bytes) => {
                let limit = match direction {
                    Direction::Inbound => self.rate_recv.limit(),
                    Direction::Outbound => self.rate_send.limit(),
                };
                self.queue_line(&quota_grant_line(digit, bytes, limit));
            }
        }
    }

    /// Queues a raw protocol line (not a command awaiting a `Reply`/`Done`) and flushes it
    /// immediately if nothing else is already buffered.
    fn queue_line(&mut self, line: &str) {
        logging::log_line(&self.log, LogLevel::Command, line.trim_end());
        let was_empty = self.send_buffer.is_empty();
        self.send_buffer.append(line.as_bytes());
        if was_empty {
            if let Some(process) = self.process.as_mut() {
                match self.send_buffer.egress(process) {
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(_) => self.do_close(ReplyCode::ERROR | ReplyCode::DISCONNECTED),
                }
            }
        }
    }

    /// Validates the port field (invariant: a hostkey prompt always names a real TCP port) and
    /// issues a `Hostkey`/`HostkeyChanged` async request carrying the encryption details
    /// accumulated so far this connection.
    fn handle_hostkey_prompt(&mut self, msg: &Message) {
        let host = msg.field(0).unwrap_or("").to_string();
        let port = match msg.field(1).and_then(|s| s.parse::<i64>().ok()) {
            Some(p) if p > 0 && p <= 65535 => p as u16,
            _ => {
                logging::log_line(&self.log, LogLevel::Error, "hostkey prompt carried an invalid port, aborting connection");
                self.do_close(ReplyCode::INTERNAL_ERROR);
                return;
            }
        };
        let changed = msg.kind == MessageKind::AskHostkeyChanged;
        let kind = if changed { AsyncRequestKind::HostkeyChanged } else { AsyncRequestKind::Hostkey };

        if self.stack.top_mut().and_then(|f| f.body.as_connect_mut()).is_none() {
            logging::log_line(&self.log, LogLevel::DebugWarning, "hostkey prompt received with no connect operation active");
            return;
        }
        if self.async_requests.has_outstanding(kind) {
            logging::log_line(&self.log, LogLevel::DebugWarning, "overlapping asynchronous request, ignoring");
            return;
        }

        let payload = AsyncRequestPayload::Hostkey {
            host,
            port,
            fingerprint: self.encryption.host_key_fingerprint.clone(),
            algorithms: self.encryption.host_key_algorithms.clone(),
            changed,
        };
        let request = self.async_requests.issue(kind, payload);
        self.engine.send_async_request(request);
    }

    /// Implements the password-challenge protocol: an interactive or key-file logon always bounces
    /// the prompt to the UI (tagging repeats of the same challenge so it can short-circuit a doomed
    /// retry loop); any other logon type answers autonomously with the stored password, closing
    /// with `CriticalError|PasswordFailed` if the same prompt recurs once already answered.
    fn handle_password_prompt(&mut self, msg: &Message) {
        let prompt_text = msg.field(0).unwrap_or("").to_string();

        let (logon_type, preamble, instruction) = match self.stack.top_mut().and_then(|f| f.body.as_connect_mut()) {
            Some(connect) => {
                let (preamble, instruction) = connect.take_challenge_context();
                (connect.credentials.logon_type, preamble, instruction)
            }
            None => {
                logging::log_line(&self.log, LogLevel::DebugWarning, "password prompt received with no connect operation active");
                return;
            }
        };

        let challenge_identifier = format!("{}\n{}\n{}", preamble, instruction, prompt_text);
        let is_keyfile = preamble == "SSH key passphrase";

        if logon_type == LogonType::Interactive || is_keyfile {
            if self.async_requests.has_outstanding(AsyncRequestKind::InteractiveLogin) {
                logging::log_line(&self.log, LogLevel::DebugWarning, "overlapping asynchronous request, ignoring");
                return;
            }
            let mut challenge = String::new();
            if !preamble.is_empty() && !is_keyfile {
                challenge.push_str(&preamble);
                challenge.push('\n');
            }
            if !instruction.is_empty() {
                challenge.push_str(&instruction);
                challenge.push('\n');
            }
            if prompt_text != "Password:" {
                challenge.push_str(&prompt_text);
            }

            let same_challenge = self
                .stack
                .top_mut()
                .and_then(|f| f.body.as_connect_mut())
                .map(|c| c.last_challenge_identifier() == Some(challenge_identifier.as_str()))
                .unwrap_or(false);

            let payload = AsyncRequestPayload::InteractiveLogin { challenge, same_challenge };
            let request = self.async_requests.issue(AsyncRequestKind::InteractiveLogin, payload);
            if let Some(connect) = self.stack.top_mut().and_then(|f| f.body.as_connect_mut()) {
                connect.set_pending_is_keyfile(is_keyfile);
                connect.set_last_challenge(challenge_identifier, is_keyfile);
            }
            self.engine.send_async_request(request);
            return;
        }

        let repeated = self
            .stack
            .top_mut()
            .and_then(|f| f.body.as_connect_mut())
            .map(|c| c.last_challenge_identifier().is_some() && !c.last_challenge_is_keyfile())
            .unwrap_or(false);
        if repeated {
            let same = self
                .stack
                .top_mut()
                .and_then(|f| f.body.as_connect_mut())
                .map(|c| c.last_challenge_identifier() == Some(challenge_identifier.as_str()))
                .unwrap_or(false);
            if same {
                logging::log_line(&self.log, LogLevel::Error, "Authentication failed.");
            } else {
                logging::log_line(&self.log, LogLevel::Error, "Server sent an additional login prompt; use interactive logon.");
            }
            if let Some(connect) = self.stack.top_mut().and_then(|f| f.body.as_connect_mut()) {
                connect.set_last_challenge(challenge_identifier, is_keyfile);
            }
            self.do_close(ReplyCode::CRITICAL_ERROR | ReplyCode::PASSWORD_FAILED);
            return;
        }

        if let Some(connect) = self.stack.top_mut().and_then(|f| f.body.as_connect_mut()) {
            connect.set_last_challenge(challenge_identifier, is_keyfile);
        }

        let password = if logon_type == LogonType::Anonymous {
            "anonymous@example.com".to_string()
        } else {
            self.stack
                .top_mut()
                .and_then(|f| f.body.as_connect_mut())
                .and_then(|c| c.credentials.password().map(str::to_string))
                .unwrap_or_default()
        };
        let masked = format!("Pass: {}", crate::server::mask_password(&password));
        let result = {
            let (_stack, mut ctx) = self.split_for_dispatch();
            ctx.send_command(&password, Some(&masked))
        };
        self.apply_result(result);
    }

    fn reply_hostkey(&mut self, request_id: RequestId, trust: HostkeyTrust) {
        let kind = match self.async_requests.complete(request_id) {
            Some(kind @ (AsyncRequestKind::Hostkey | AsyncRequestKind::HostkeyChanged)) => kind,
            _ => {
                logging::log_line(&self.log, LogLevel::DebugWarning, "hostkey reply for an unknown request id");
                return;
            }
        };
        let changed_prefix = if kind == AsyncRequestKind::HostkeyChanged { "Trust changed Hostkey:" } else { "Trust new Hostkey:" };
        let (command, echo_suffix) = match trust {
            HostkeyTrust::Untrusted => ("", "No"),
            HostkeyTrust::AlwaysTrust => ("y", "Yes"),
            HostkeyTrust::Once => ("n", "Once"),
        };
        let echo = format!("{} {}", changed_prefix, echo_suffix);
        let result = {
            let (_stack, mut ctx) = self.split_for_dispatch();
            ctx.send_command(command, Some(&echo))
        };
        if trust == HostkeyTrust::Untrusted {
            if let Some(connect) = self.stack.top_mut().and_then(|f| f.body.as_connect_mut()) {
                connect.critical_failure = true;
            }
        }
        self.apply_result(result);
    }

    fn reply_interactive_login(&mut self, request_id: RequestId, password: Option<String>) {
        if self.async_requests.complete(request_id).is_none() {
            logging::log_line(&self.log, LogLevel::DebugWarning, "login reply for an unknown request id");
            return;
        }
        let password = match password {
            Some(password) => password,
            None => {
                self.do_close(ReplyCode::CANCELED);
                return;
            }
        };
        let is_keyfile = self.stack.top_mut().and_then(|f| f.body.as_connect_mut()).map(|c| c.pending_is_keyfile()).unwrap_or(false);
        if !is_keyfile {
            if let Some(connect) = self.stack.top_mut().and_then(|f| f.body.as_connect_mut()) {
                connect.credentials.set_password(password.clone());
            }
        }
        let masked = format!("Pass: {}", crate::server::mask_password(&password));
        let result = {
            let (_stack, mut ctx) = self.split_for_dispatch();
            ctx.send_command(&password, Some(&masked))
        };
        self.apply_result(result);
    }

    fn reply_file_exists(&mut self, request_id: RequestId, action: FileExistsAction) {
        if self.async_requests.complete(request_id).is_none() {
            logging::log_line(&self.log, LogLevel::DebugWarning, "file-exists reply for an unknown request id");
            return;
        }
        let immediate = match self.stack.top_mut().and_then(|f| f.body.as_file_transfer_mut()) {
            Some(transfer) => transfer.apply_file_exists_decision(action),
            None => {
                logging::log_line(&self.log, LogLevel::DebugWarning, "file-exists reply with no active transfer");
                return;
            }
        };
        match immediate {
            Some(code) => self.apply_result(code),
            None => self.send_next_command(),
        }
    }

    fn finish_current_command(&mut self, status: ReplyCode, text: String) {
        if self.stack.is_empty() {
            logging::log_line(&self.log, LogLevel::DebugWarning, "unsolicited completion ignored");
            return;
        }
        if text.len() > self.config.max_reply_line_bytes {
            logging::log_line(&self.log, LogLevel::Error, "reply line exceeded the maximum accepted size");
            self.do_close(ReplyCode::ERROR | ReplyCode::DISCONNECTED);
            return;
        }
        let reply = ReplyText { status, text };
        let result = {
            let (stack, mut ctx) = self.split_for_dispatch();
            match stack.top_mut() {
                Some(frame) => frame.body.parse_response(&mut ctx, &reply),
                None => return,
            }
        };
        self.apply_result(result);
    }

    // ---- operation stack plumbing -------------------------------------------------------------

    /// Rejects a new top-level command while one is already active rather than silently stacking
    /// on top of it: per I2, exactly one operation owns the send channel at a time, and a second
    /// top-level push while the first is still outstanding would otherwise let the first command's
    /// own reply land on whichever frame happens to be on top when it arrives, fabricating a result
    /// for an operation that was never actually observed to complete.
    fn push_operation(&mut self, frame: OperationFrame) {
        if !self.stack.is_empty() {
            logging::log_line(&self.log, LogLevel::Error, "rejecting command: an operation is already in progress");
            self.engine.operation_finished(frame.body.command(), ReplyCode::INTERNAL_ERROR);
            return;
        }

        let needs_connect = frame.body.command() != Command::Connect && self.process.is_none();
        self.stack.push(frame);

        if needs_connect {
            let (server, credentials) = match (&self.last_server, &self.last_credentials) {
                (Some(s), Some(c)) => (s.clone(), c.clone()),
                _ => {
                    logging::log_line(&self.log, LogLevel::Error, "cannot reconnect: no server has ever been connected");
                    self.apply_result(ReplyCode::NOT_CONNECTED);
                    return;
                }
            };
            self.encoding = server.encoding.clone();
            let connect_frame =
                OperationFrame::new(Command::Connect.name(), false, OperationBody::Connect(ConnectOp::new(server, credentials)));
            self.stack.push(connect_frame);
        }

        self.send_next_command();
    }

    fn send_next_command(&mut self) {
        let result = {
            let (stack, mut ctx) = self.split_for_dispatch();
            match stack.top_mut() {
                Some(frame) => {
                    frame.started = true;
                    frame.body.send(&mut ctx)
                }
                None => return,
            }
        };

        // `FileTransfer`'s first `send` only advances to the existence-check stage without
        // putting anything on the wire; surface the prompt here rather than treating its
        // `WOULD_BLOCK` as a real command in flight awaiting a `Done` that will never arrive.
        let pending_check = self.stack.top_mut().and_then(|f| f.body.as_file_transfer_mut()).and_then(|t| t.check_remote_existence());
        if let Some(request) = pending_check {
            let issued = self.async_requests.issue(request.kind, request.payload);
            self.engine.send_async_request(issued);
            return;
        }

        self.apply_result(result);
    }

    fn apply_result(&mut self, result: ReplyCode) {
        if result.is_would_block() {
            return;
        }
        if result.is_continue() {
            self.send_next_command();
            return;
        }
        if result.has_disconnected() {
            self.do_close(result);
            return;
        }
        let is_connect = self.stack.top_mut().map(|f| f.body.command() == Command::Connect).unwrap_or(false);
        if result.is_error() && is_connect {
            self.do_close(result | ReplyCode::DISCONNECTED);
            return;
        }
        if is_connect {
            let critical = self.stack.top_mut().and_then(|f| f.body.as_connect_mut()).map(|c| c.critical_failure).unwrap_or(false);
            if critical {
                self.do_close(ReplyCode::CRITICAL_ERROR | ReplyCode::DISCONNECTED);
                return;
            }
        }
        self.reset_operation(result);
    }

    fn reset_operation(&mut self, result: ReplyCode) {
        let popped = self.stack.pop();
        if let Some(frame) = &popped {
            if frame.top_level {
                self.engine.operation_finished(frame.body.command(), result);
            }
        }
        if self.stack.is_empty() {
            return;
        }
        let started = self.stack.top_mut().map(|f| f.started).unwrap_or(false);
        if started {
            let next_result = {
                let (stack, mut ctx) = self.split_for_dispatch();
                stack.top_mut().unwrap().body.subcommand_result(&mut ctx, result)
            };
            self.apply_result(next_result);
        } else {
            self.send_next_command();
        }
    }

    /// Tears the helper connection down unconditionally, in the order the helper/parser/process
    /// teardown must precede unwinding operations: release the rate buckets, kill the helper, drop
    /// the parser (bumping the generation counter so any event still in flight from the dying
    /// connection is dropped on arrival), drop the process adapter, reset encryption, and only then
    /// pop every frame, reporting top-level ones finished with `reason`. Unwinding last means a
    /// synchronous reaction to `operation_finished` (e.g. the embedder pushing a new command) sees
    /// a socket that already has no live process, so it gets a real reconnect rather than being
    /// silently dropped onto a connection that's about to die.
    fn do_close(&mut self, reason: ReplyCode) {
        logging::log_line(&self.log, LogLevel::Status, "closing control socket");
        self.quota_pending_recv = false;
        self.quota_pending_send = false;
        self.rate_recv.detach();
        self.rate_send.detach();
        if let Some(process) = self.process.take() {
            process.kill();
        }
        self.input_parser = None;
        self.generation = self.generation.wrapping_add(1);
        self.send_buffer = SendBuffer::new();
        self.encryption.reset();
        self.async_requests.clear();
        while let Some(frame) = self.stack.pop() {
            if frame.top_level {
                self.engine.operation_finished(frame.body.command(), reason);
            }
        }
    }

    /// Splits `self` into a stack borrow and an `OpContext` borrow of the remaining fields.
    /// Necessary because `OpContext` needs simultaneous mutable access to several fields of
    /// `self` alongside the stack; doing the field projection here, in one function body, is what
    /// lets the borrow checker see the two halves are disjoint.
    fn split_for_dispatch(&mut self) -> (&mut OperationStack, OpContext) {
        let ctx = OpContext {
            log: &self.log,
            process: &mut self.process,
            send_buffer: &mut self.send_buffer,
            encoding: &self.encoding,
            helper_program: &self.helper_program,
            helper_args: &self.helper_args,
        };
        (&mut self.stack, ctx)
    }
}
