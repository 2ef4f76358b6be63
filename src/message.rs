/// Tag of an unsolicited line arriving from the helper process, independent of whether a command
/// is currently in flight. `Reply` and `Done` close out the current command; everything else is
/// routed without regard to the operation stack's busy/idle state.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum MessageKind {
    Reply,
    Done,
    Error,
    Verbose,
    Info,
    Status,
    Recv,
    Send,
    Transfer,
    AskHostkey,
    AskHostkeyChanged,
    AskHostkeyBetteralg,
    AskPassword,
    RequestPreamble,
    RequestInstruction,
    UsedQuotaRecv,
    UsedQuotaSend,
    KexAlgorithm,
    KexHash,
    KexCurve,
    CipherClientToServer,
    CipherServerToClient,
    MacClientToServer,
    MacServerToClient,
    Hostkey,
    IoNextbuf,
    IoOpen,
    IoSize,
    IoFinalize,
}

/// A single decoded line from the helper, tagged by kind with its tab-separated fields.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub fields: Vec<String>,
}

impl Message {
    pub fn new(kind: MessageKind, fields: Vec<String>) -> Message {
        Message { kind, fields }
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }
}

/// One directory-listing row, forwarded to the active `List` operation verbatim; the format of
/// `raw` is owned by the helper's own `ls` reply grammar, not by this crate.
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub raw: String,
}
