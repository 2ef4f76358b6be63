use crate::operation::{OpContext, ReplyText};
use crate::quoting::quote_filename;
use crate::reply_code::ReplyCode;

/// Deletes a batch of files from one remote directory, one `rm` per file. Unlike `Connect`, a
/// mid-batch failure is not recovered from: the operation simply propagates the error, leaving
/// whichever files were already removed removed.
pub struct DeleteOp {
    pub path: String,
    pub files: Vec<String>,
    index: usize,
}

impl DeleteOp {
    pub fn new(path: String, files: Vec<String>) -> DeleteOp {
        DeleteOp { path, files, index: 0 }
    }

    pub fn send(&mut self, ctx: &mut OpContext) -> ReplyCode {
        match self.files.get(self.index) {
            Some(file) => {
                let full_path = format!("{}/{}", self.path.trim_end_matches('/'), file);
                let command = format!("rm {}", quote_filename(&full_path));
                ctx.send_command(&command, None)
            }
            None => ReplyCode::INTERNAL_ERROR,
        }
    }

    pub fn parse_response(&mut self, _ctx: &mut OpContext, reply: &ReplyText) -> ReplyCode {
        if reply.status.is_error() {
            return reply.status;
        }
        self.index += 1;
        if self.index >= self.files.len() {
            ReplyCode::OK
        } else {
            ReplyCode::CONTINUE
        }
    }

    pub fn subcommand_result(&mut self, _ctx: &mut OpContext, previous: ReplyCode) -> ReplyCode {
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::send_buffer::SendBuffer;

    #[test]
    fn advances_through_every_file_before_reporting_ok() {
        let mut op = DeleteOp::new("/home".into(), vec!["a.txt".into(), "b.txt".into()]);
        let log = crate::logging::default_root_logger();
        let mut process = None;
        let mut send_buffer = SendBuffer::new();
        let encoding = crate::server::EncodingHint::Utf8;
        let mut ctx = OpContext { log: &log, process: &mut process, send_buffer: &mut send_buffer, encoding: &encoding, helper_program: "", helper_args: &[] };

        op.send(&mut ctx);
        let ok = ReplyText { status: ReplyCode::OK, text: String::new() };
        assert!(op.parse_response(&mut ctx, &ok).is_continue());
        assert_eq!(op.index, 1);

        op.send(&mut ctx);
        assert!(op.parse_response(&mut ctx, &ok).is_ok());
    }
}
