//! Failure classification for upstream calls.
//!
//! Transport-class failures are attributed to the proxy and trigger a
//! forced reassignment; everything else is an application failure.

use std::error::Error as StdError;

/// Lower-cased fragments that identify a transport failure anywhere in an
/// error's source chain.
const TRANSPORT_SIGNATURES: &[&str] = &[
    "connection reset",
    "connection refused",
    "connection aborted",
    "connection closed",
    "timed out",
    "deadline has elapsed",
    "dns error",
    "failed to lookup address",
    "name or service not known",
    "no route to host",
    "network is unreachable",
    "host is unreachable",
    "broken pipe",
    "socket",
    "socks",
    "econnreset",
    "econnrefused",
    "etimedout",
    "enotfound",
    "ehostunreach",
];

/// Outcome of a failed upstream call, before it is attributed to a stage.
#[derive(Debug)]
pub(super) enum CallFailure {
    /// Connection-level failure; the bound proxy is suspect
    Transport(String),
    /// Non-success HTTP status
    Status { status: u16, body: String },
    /// 2xx with a payload we cannot use
    Malformed(String),
}

impl CallFailure {
    pub(super) fn from_reqwest(err: &reqwest::Error) -> Self {
        let message = error_chain_text(err);
        if is_transport_error(err) {
            Self::Transport(message)
        } else {
            Self::Malformed(message)
        }
    }
}

/// Whether `err` is a connection-level failure.
pub fn is_transport_error(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_connect() {
        return true;
    }
    if err.is_status() || err.is_builder() || err.is_redirect() {
        return false;
    }
    matches_transport_signature(&error_chain_text(err))
}

/// Whether `message` contains one of the transport signatures.
pub fn matches_transport_signature(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    TRANSPORT_SIGNATURES.iter().any(|sig| lowered.contains(sig))
}

/// `err` and all of its sources joined with `": "`.
pub(super) fn error_chain_text(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signatures_match_common_transport_messages() {
        assert!(matches_transport_signature("error sending request: Connection reset by peer (os error 104)"));
        assert!(matches_transport_signature("dns error: failed to lookup address information"));
        assert!(matches_transport_signature("operation timed out"));
        assert!(matches_transport_signature("ECONNREFUSED"));
        assert!(matches_transport_signature("socks connect error: General SOCKS server failure"));

        assert!(!matches_transport_signature("HTTP status client error (401 Unauthorized)"));
        assert!(!matches_transport_signature("error decoding response body: expected value at line 1"));
    }

    #[tokio::test]
    async fn test_refused_connection_is_transport() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = reqwest::Client::new()
            .get(format!("http://{}/", addr))
            .send()
            .await
            .unwrap_err();

        assert!(is_transport_error(&err));
        assert!(matches!(CallFailure::from_reqwest(&err), CallFailure::Transport(_)));
    }
}
