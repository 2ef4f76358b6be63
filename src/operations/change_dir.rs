use crate::operation::{OpContext, ReplyText};
use crate::quoting::quote_filename;
use crate::reply_code::ReplyCode;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Stage {
    NotStarted,
    Awaiting,
}

/// Changes the helper's idea of the current remote directory, optionally resolving a relative
/// `sub_dir` against `path` first.
pub struct ChangeDirOp {
    pub path: String,
    pub sub_dir: Option<String>,
    pub link_discovery: bool,
    stage: Stage,
}

impl ChangeDirOp {
    pub fn new(path: String, sub_dir: Option<String>, link_discovery: bool) -> ChangeDirOp {
        ChangeDirOp { path, sub_dir, link_discovery, stage: Stage::NotStarted }
    }

    pub fn send(&mut self, ctx: &mut OpContext) -> ReplyCode {
        match self.stage {
            Stage::NotStarted => {
                self.stage = Stage::Awaiting;
                let mut command = String::from("cd");
                if self.link_discovery {
                    command.push_str(" -resolve-links");
                }
                command.push(' ');
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
