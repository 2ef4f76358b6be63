use crate::operation::{OpContext, ReplyText};
use crate::quoting::quote_filename;
use crate::reply_code::ReplyCode;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Stage {
    NotStarted,
    Awaiting,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MkdirFlags {
    pub create_parents: bool,
}

pub struct MkdirOp {
    pub path: String,
    pub flags: MkdirFlags,
    stage: Stage,
}

impl MkdirOp {
    pub fn new(path: String, flags: MkdirFlags) -> MkdirOp {
        MkdirOp { path, flags, stage: Stage::NotStarted }
    }

    pub fn send(&mut self, ctx: &mut OpContext) -> ReplyCode {
        match self.stage {
            Stage::NotStarted => {
                self.stage = Stage::Awaiting;
                let mut command = String::from("mkdir");
                if self.flags.create_parents {
                    command.push_str(" -p");
                }
                command.push(' ');
                command.push_str(&quote_filename(&self.path));
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
