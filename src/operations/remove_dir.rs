use crate::operation::{OpContext, ReplyText};
use crate::quoting::quote_filename;
use crate::reply_code::ReplyCode;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Stage {
    NotStarted,
    Awaiting,
}

pub struct RemoveDirOp {
    pub path: String,
    pub sub_dir: Option<String>,
    stage: Stage,
}

impl RemoveDirOp {
    pub fn new(path: String, sub_dir: Option<String>) -> RemoveDirOp {
        RemoveDirOp { path, sub_dir, stage: Stage::NotStarted }
    }

    pub fn send(&mut self, ctx: &mut OpContext) -> ReplyCode {
        match self.stage {
            Stage::NotStarted => {
                self.stage = Stage::Awaiting;
                let mut command = String::from("rmdir ");
                command.push_str(&quote_filename(&self.path));
                if let Some(sub_dir) = &self.sub_dir {
                    command.push(' ');
                    command.push_str(&quote_filename(sub_dir));
                }
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
