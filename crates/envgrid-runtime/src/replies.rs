//! Translation of docker/kubectl error text into typed replies.
//!
//! This is a known coupling to the CLI message format: docker and kubectl
//! only report "already connected" or "already exists" through stderr
//! text. Callers match on [`RuntimeReply`] and never inspect stderr
//! themselves.

/// What a failed runtime command was trying to tell us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeReply {
    /// The container is already attached to the target network.
    AlreadyConnected,
    /// The container is not attached to the target network.
    NotConnected,
    /// The object being created already exists.
    AlreadyExists,
    /// The object being addressed does not exist.
    NotFound,
    /// Anything else; treat as a genuine failure.
    Other,
}

/// Classify the stderr of a failed docker or kubectl invocation.
pub fn classify(stderr: &str) -> RuntimeReply {
    let text = stderr.to_ascii_lowercase();
    if text.contains("already exists in network") {
        RuntimeReply::AlreadyConnected
    } else if text.contains("is not connected to network")
        || text.contains("is not connected to the network")
    {
        RuntimeReply::NotConnected
    } else if text.contains("(alreadyexists)") || text.contains("already exists") {
        RuntimeReply::AlreadyExists
    } else if text.contains("no such container")
        || text.contains("no such network")
        || text.contains("(notfound)")
    {
        RuntimeReply::NotFound
    } else {
        RuntimeReply::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_network_replies() {
        assert_eq!(
            classify("Error response from daemon: endpoint with name abc_api_1 already exists in network envgrid_default"),
            RuntimeReply::AlreadyConnected
        );
        assert_eq!(
            classify("Error response from daemon: container 3f2a is not connected to network envgrid_default"),
            RuntimeReply::NotConnected
        );
        assert_eq!(
            classify("Error response from daemon: No such container: abc_api_1"),
            RuntimeReply::NotFound
        );
    }

    #[test]
    fn kubectl_replies() {
        assert_eq!(
            classify("Error from server (AlreadyExists): namespaces \"abc\" already exists"),
            RuntimeReply::AlreadyExists
        );
        assert_eq!(
            classify("Error from server (NotFound): namespaces \"abc\" not found"),
            RuntimeReply::NotFound
        );
    }

    #[test]
    fn unknown_text_is_other() {
        assert_eq!(classify("permission denied"), RuntimeReply::Other);
        assert_eq!(classify(""), RuntimeReply::Other);
    }
}
