use crate::message::ListEntry;
use crate::operation::{OpContext, ReplyText};
use crate::quoting::quote_filename;
use crate::reply_code::ReplyCode;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Stage {
    NotStarted,
    Awaiting,
}

/// Extra behavior toggles for a directory listing. `filter_dirs`/`filter_files` each gate their own
/// entry kind independently — unlike the original filter editor's `ApplyToDirs` persistence, which
/// read `filter_files`'s value by mistake, `push_entry` below checks each flag against the kind it
/// actually names.
#[derive(Debug, Clone, Copy)]
pub struct ListFlags {
    pub refresh: bool,
    pub link_discovery: bool,
    pub filter_dirs: bool,
    pub filter_files: bool,
}

impl Default for ListFlags {
    fn default() -> ListFlags {
        ListFlags { refresh: false, link_discovery: false, filter_dirs: true, filter_files: true }
    }
}

/// Lists one directory, optionally resolving a relative `sub_dir` against `path` first the same way
/// `ChangeDir`/`RemoveDir` do. `entries` accumulates as `ListEntry` lines arrive; `ControlSocket`
/// forwards them here whenever this operation is at the top of the stack before the matching `Done`.
pub struct ListOp {
    pub path: String,
    pub sub_dir: Option<String>,
    pub flags: ListFlags,
    pub entries: Vec<ListEntry>,
    stage: Stage,
}

impl ListOp {
    pub fn new(path: String, sub_dir: Option<String>, flags: ListFlags) -> ListOp {
        ListOp { path, sub_dir, flags, entries: Vec::new(), stage: Stage::NotStarted }
    }

    /// A raw `ls -l`-style line begins with `d` for a directory, `-` for a plain file. Dropped here
    /// rather than at the final forwarding point, so a filtered-out entry never reaches the engine.
    pub fn push_entry(&mut self, entry: ListEntry) {
        let is_dir = entry.raw.as_bytes().first() == Some(&b'd');
        if is_dir && !self.flags.filter_dirs {
            return;
        }
        if !is_dir && !self.flags.filter_files {
            return;
        }
        self.entries.push(entry);
    }

    pub fn send(&mut self, ctx: &mut OpContext) -> ReplyCode {
        match self.stage {
            Stage::NotStarted => {
                self.stage = Stage::Awaiting;
                let mut command = String::from("ls");
                if self.flags.refresh {
                    command.push_str(" -refresh");
                }
                if self.flags.link_discovery {
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
