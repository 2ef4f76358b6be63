/// Wire-level protocol the helper was told to speak for a given server.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Protocol {
    Sftp,
    Scp,
}

/// Filename encoding the helper and remote end negotiated.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum EncodingHint {
    Utf8,
    Custom(String),
}

/// Target of a connect operation. `ControlSocket` retains the last one used so a later command
/// issued against a dead helper can synthesize a reconnect transparently.
#[derive(Debug, Clone)]
pub struct Server {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub encoding: EncodingHint,
    pub key_file: Option<String>,
}

/// How the password/identity for a server was meant to be supplied.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LogonType {
    Anonymous,
    Normal,
    Ask,
    Interactive,
    KeyFile,
    Account,
}

/// Credentials for one connect attempt, owned by the `Connect` operation for its lifetime.
/// Outlives a single password prompt: a later UI reply overwrites `password` without discarding
/// the rest.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub logon_type: LogonType,
    password: Option<String>,
    pub account: String,
    pub key_files: Vec<String>,
}

impl Credentials {
    pub fn new(logon_type: LogonType) -> Credentials {
        Credentials { logon_type, password: None, account: String::new(), key_files: Vec::new() }
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn set_password(&mut self, password: String) {
        self.password = Some(password);
    }
}

/// Masks a password for logging: every character becomes `*`, length preserved. Grounded on the
/// teacher's own `Authenticator::protect_key`, which partially masks a serial key before it is
/// written to an audit log.
pub fn mask_password(password: &str) -> String {
    "*".repeat(password.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_password_preserves_length_not_content() {
        let masked = mask_password("hunter2");
        assert_eq!(masked.len(), "hunter2".len());
        assert!(masked.chars().all(|c| c == '*'));
    }

    #[test]
    fn later_password_overwrites_without_clearing_account() {
        let mut creds = Credentials::new(LogonType::Normal);
        creds.account = "alice".to_string();
        creds.set_password("first".to_string());
        creds.set_password("second".to_string());
        assert_eq!(creds.password(), Some("second"));
        assert_eq!(creds.account, "alice");
    }
}
