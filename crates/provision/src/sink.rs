//! Persistence hand-off for issued credentials.

/// Receives each successfully issued credential exactly once.
///
/// Durability and atomicity of the record are the implementor's concern.
pub trait CredentialSink: Send + Sync {
    /// `uid` and `payload` are lowercase hex; `owner` may be empty.
    fn record_issued_credential(&self, owner: &str, uid: &str, payload: &str);
}
