use crate::operation::{OpContext, ReplyText};
use crate::quoting::quote_filename;
use crate::reply_code::ReplyCode;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Stage {
    NotStarted,
    Awaiting,
}

pub struct ChmodOp {
    pub path: String,
    pub permissions: String,
    stage: Stage,
}

impl ChmodOp {
    pub fn new(path: String, permissions: String) -> ChmodOp {
        ChmodOp { path, permissions, stage: Stage::NotStarted }
    }

    pub fn send(&mut self, ctx: &mut OpContext) -> ReplyCode {
        match self.stage {
            Stage::NotStarted => {
                self.stage = Stage::Awaiting;
                let command = format!("chmod {} {}", self.permissions, quote_filename(&self.path));
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
