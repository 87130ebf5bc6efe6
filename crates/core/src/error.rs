/// Errors that can occur across the sandbox lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// All capacity slots are taken. Recoverable: the caller may retry later.
    #[error("sandbox capacity exceeded")]
    CapacityExceeded,

    /// The runtime failed after a slot was granted. The slot has already been
    /// released when this is returned.
    #[error("sandbox provisioning failed: {0}")]
    ProvisionFailed(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The session record exists but its sandbox no longer does.
    #[error("sandbox gone for session {0}")]
    SandboxGone(String),

    #[error("state store unavailable: {0}")]
    StoreUnavailable(String),

    /// A stored session record that cannot be decoded.
    #[error("malformed session record: {0}")]
    MalformedRecord(String),

    #[error("feature not supported: {0}")]
    UnsupportedFeature(String),

    #[error("sandbox runtime error: {0}")]
    Runtime(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_capacity_exceeded() {
        let err = Error::CapacityExceeded;
        assert_eq!(err.to_string(), "sandbox capacity exceeded");
    }

    #[test]
    fn error_display_provision_failed() {
        let err = Error::ProvisionFailed("image missing".to_string());
        assert_eq!(
            err.to_string(),
            "sandbox provisioning failed: image missing"
        );
    }

    #[test]
    fn error_display_session_not_found() {
        let err = Error::SessionNotFound("deadbeef".to_string());
        assert_eq!(err.to_string(), "session not found: deadbeef");
    }

    #[test]
    fn error_display_sandbox_gone() {
        let err = Error::SandboxGone("deadbeef".to_string());
        assert_eq!(err.to_string(), "sandbox gone for session deadbeef");
    }

    #[test]
    fn error_display_unsupported_feature() {
        let err = Error::UnsupportedFeature("storage quota".to_string());
        assert_eq!(err.to_string(), "feature not supported: storage quota");
    }

    #[test]
    fn error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "socket not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("socket not found"));
    }
}
