bitflags::bitflags! {
    /// Status carried on every reply from an operation's `send`/`parse_response`/
    /// `subcommand_result` calls. The low byte holds one mutually-exclusive base status; the high
    /// bits are independent modifiers that may accompany `ERROR` or `CRITICAL_ERROR` (e.g. a
    /// disconnect reason riding alongside the error that caused it).
    pub struct ReplyCode: u16 {
        const OK            = 0b0000_0000_0000_0001;
        const ERROR         = 0b0000_0000_0000_0010;
        const CRITICAL_ERROR = 0b0000_0000_0000_0100;
        const WOULD_BLOCK   = 0b0000_0000_0000_1000;
        const CONTINUE      = 0b0000_0000_0001_0000;
        const CANCELED      = 0b0000_0000_0010_0000;
        const INTERNAL_ERROR = 0b0000_0000_0100_0000;
        const NOT_CONNECTED = 0b0000_0000_1000_0000;

        const DISCONNECTED    = 0b0001_0000_0000_0000;
        const PASSWORD_FAILED = 0b0010_0000_0000_0000;
        const TIMEOUT         = 0b0100_0000_0000_0000;

        const STATUS_MASK = 0b0000_0000_1111_1111;
    }
}

impl ReplyCode {
    pub fn status(self) -> ReplyCode {
        self & Self::STATUS_MASK
    }

    pub fn is_ok(self) -> bool {
        self.status() == Self::OK
    }

    pub fn is_error(self) -> bool {
        self.intersects(Self::ERROR | Self::CRITICAL_ERROR)
    }

    pub fn is_critical(self) -> bool {
        self.status() == Self::CRITICAL_ERROR
    }

    pub fn is_would_block(self) -> bool {
        self.status() == Self::WOULD_BLOCK
    }

    pub fn is_continue(self) -> bool {
        self.status() == Self::CONTINUE
    }

    pub fn is_canceled(self) -> bool {
        self.status() == Self::CANCELED
    }

    pub fn has_disconnected(self) -> bool {
        self.contains(Self::DISCONNECTED)
    }

    pub fn has_password_failed(self) -> bool {
        self.contains(Self::PASSWORD_FAILED)
    }

    pub fn has_timeout(self) -> bool {
        self.contains(Self::TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modifiers_compose_with_error() {
        let code = ReplyCode::ERROR | ReplyCode::DISCONNECTED;
        assert!(code.is_error());
        assert!(code.has_disconnected());
        assert!(!code.has_password_failed());
    }

    #[test]
    fn status_extracts_base_value_only() {
        let code = ReplyCode::CRITICAL_ERROR | ReplyCode::TIMEOUT;
        assert_eq!(code.status(), ReplyCode::CRITICAL_ERROR);
        assert!(code.is_critical());
    }

    #[test]
    fn ok_has_no_modifiers_by_default() {
        assert!(ReplyCode::OK.is_ok());
        assert!(!ReplyCode::OK.has_timeout());
    }
}
