use indexmap::IndexMap;

/// Identifier a UI reply must echo back to correlate with the prompt it answers.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct RequestId(pub u64);

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AsyncRequestKind {
    FileExists,
    Hostkey,
    HostkeyChanged,
    InteractiveLogin,
}

#[derive(Debug, Clone)]
pub enum AsyncRequestPayload {
    Hostkey {
        host: String,
        port: u16,
        fingerprint: Option<String>,
        algorithms: Option<String>,
        /// True for a key that changed since the last successful connection, false for a
        /// never-before-seen key — the two prompts carry different wording to the UI.
        changed: bool,
    },
    InteractiveLogin {
        challenge: String,
        same_challenge: bool,
    },
    FileExists {
        local_name: String,
        remote_name: String,
    },
}

#[derive(Debug, Clone)]
pub struct AsyncRequest {
    pub request_id: RequestId,
    pub kind: AsyncRequestKind,
    pub payload: AsyncRequestPayload,
}

/// Outstanding UI prompts keyed by request id. `ControlSocket` owns exactly one registry for its
/// one active top-level operation, guaranteeing at most one outstanding request per kind.
///
/// Grounded loosely on the correlation-map shape used to match asynchronous replies to requests
/// in `other_examples/`'s openssh-sftp-client connection layer, adapted here from an async
/// request/response future to a plain synchronous lookup since this crate has no executor.
#[derive(Default)]
pub struct AsyncRequestRegistry {
    next_id: u64,
    outstanding: IndexMap<RequestId, AsyncRequestKind>,
}

impl AsyncRequestRegistry {
    pub fn new() -> AsyncRequestRegistry {
        AsyncRequestRegistry { next_id: 1, outstanding: IndexMap::new() }
    }

    pub fn has_outstanding(&self, kind: AsyncRequestKind) -> bool {
        self.outstanding.values().any(|k| *k == kind)
    }

    pub fn issue(&mut self, kind: AsyncRequestKind, payload: AsyncRequestPayload) -> AsyncRequest {
        debug_assert!(!self.has_outstanding(kind), "at most one outstanding request per kind");
        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.outstanding.insert(id, kind);
        AsyncRequest { request_id: id, kind, payload }
    }

    pub fn complete(&mut self, id: RequestId) -> Option<AsyncRequestKind> {
        self.outstanding.shift_remove(&id)
    }

    pub fn clear(&mut self) {
        self.outstanding.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issuing_assigns_increasing_ids() {
        let mut registry = AsyncRequestRegistry::new();
        let first = registry.issue(
            AsyncRequestKind::Hostkey,
            AsyncRequestPayload::Hostkey { host: "h".into(), port: 22, fingerprint: None, algorithms: None, changed: false },
        );
        let second = registry.issue(
            AsyncRequestKind::FileExists,
            AsyncRequestPayload::FileExists { local_name: "a".into(), remote_name: "b".into() },
        );
        assert_ne!(first.request_id, second.request_id);
    }

    #[test]
    fn complete_removes_the_outstanding_entry() {
        let mut registry = AsyncRequestRegistry::new();
        let req = registry.issue(
            AsyncRequestKind::HostkeyChanged,
            AsyncRequestPayload::Hostkey { host: "h".into(), port: 22, fingerprint: None, algorithms: None, changed: false },
        );
        assert!(registry.has_outstanding(AsyncRequestKind::HostkeyChanged));
        registry.complete(req.request_id);
        assert!(!registry.has_outstanding(AsyncRequestKind::HostkeyChanged));
    }
}
