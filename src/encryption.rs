/// Transient summary of the current SSH transport negotiation, accumulated from helper events
/// (`KexAlgorithm`, `Hostkey`, the cipher/MAC pairs) and surfaced to host-key prompts. Reset on
/// every transition out of the connected state, per invariant I4.
#[derive(Debug, Clone, Default)]
pub struct EncryptionDetails {
    pub kex_algorithm: Option<String>,
    pub kex_hash: Option<String>,
    pub kex_curve: Option<String>,
    pub cipher_client_to_server: Option<String>,
    pub cipher_server_to_client: Option<String>,
    pub mac_client_to_server: Option<String>,
    pub mac_server_to_client: Option<String>,
    pub host_key_algorithms: Option<String>,
    pub host_key_fingerprint: Option<String>,
}

impl EncryptionDetails {
    pub fn reset(&mut self) {
        *self = EncryptionDetails::default();
    }

    /// Accumulates a `Hostkey` message's text: the last whitespace-separated token is the
    /// fingerprint, and the preceding tokens form the advertised algorithm list.
    pub fn set_hostkey(&mut self, text: &str) {
        let mut tokens: Vec<&str> = text.split_whitespace().collect();
        if let Some(fingerprint) = tokens.pop() {
            self.host_key_fingerprint = Some(fingerprint.to_string());
            self.host_key_algorithms = Some(tokens.join(" "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_every_field() {
        let mut details = EncryptionDetails::default();
        details.set_hostkey("ssh-ed25519 SHA256:abcd");
        details.kex_algorithm = Some("curve25519-sha256".to_string());
        details.reset();
        assert!(details.host_key_fingerprint.is_none());
        assert!(details.kex_algorithm.is_none());
    }

    #[test]
    fn set_hostkey_splits_algorithms_from_fingerprint() {
        let mut details = EncryptionDetails::default();
        details.set_hostkey("ssh-ed25519 ssh-rsa SHA256:abcd1234");
        assert_eq!(details.host_key_fingerprint.as_deref(), Some("SHA256:abcd1234"));
        assert_eq!(details.host_key_algorithms.as_deref(), Some("ssh-ed25519 ssh-rsa"));
    }
}
