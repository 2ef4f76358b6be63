use crate::operation::{OpContext, ReplyText};
use crate::quoting::quote_filename;
use crate::reply_code::ReplyCode;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Stage {
    NotStarted,
    Awaiting,
}

pub struct RenameOp {
    pub from_path: String,
    pub to_path: String,
    stage: Stage,
}

impl RenameOp {
    pub fn new(from_path: String, to_path: String) -> RenameOp {
        RenameOp { from_path, to_path, stage: Stage::NotStarted }
    }

    pub fn send(&mut self, ctx: &mut OpContext) -> ReplyCode {
        match self.stage {
            Stage::NotStarted => {
                self.stage = Stage::Awaiting;
                let command = format!("rename {} {}", quote_filename(&self.from_path), quote_filename(&self.to_path));
                ctx.send_command(&command, None)
            }
            Stage::Awaiting => ReplyCode::INTERNAL_ERROR,
        }
    }

    pub fn parse_response(&mut self, _ctx: &mut OpContext, reply: &ReplyText) -> ReplyCode {
        reply.status
    }

    pub fn subcommand_result(&mut self, _ctx: &mut OpContext, previous: ReplyCode) -> ReplyCode {
        previous
    }
}
