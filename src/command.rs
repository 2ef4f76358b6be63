/// The ten command families a `ControlSocket` can push onto its operation stack.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Command {
    None,
    Connect,
    List,
    ChangeDir,
    FileTransfer,
    Delete,
    RemoveDir,
    Mkdir,
    Chmod,
    Rename,
}

impl Command {
    pub fn name(self) -> &'static str {
        match self {
            Command::None => "none",
            Command::Connect => "connect",
            Command::List => "list",
            Command::ChangeDir => "changeDir",
            Command::FileTransfer => "fileTransfer",
            Command::Delete => "delete",
            Command::RemoveDir => "removeDir",
            Command::Mkdir => "mkdir",
            Command::Chmod => "chmod",
            Command::Rename => "rename",
        }
    }
}
