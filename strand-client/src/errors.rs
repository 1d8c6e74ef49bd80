//! Error types for strand-client.

use std::{fmt, io};

use strand_crypto::CryptoError;
use strand_mtproto::transport::TransportError;
use strand_mtproto::{BadMessage, NegotiationError};
use strand_tl::types;

// ─── RpcError ─────────────────────────────────────────────────────────────────

/// An error returned by the server in response to an RPC call.
///
/// Numeric values are stripped from the name and placed in [`RpcError::value`].
///
/// # Example
/// `FLOOD_WAIT_30` → `RpcError { code: 420, name: "FLOOD_WAIT", value: Some(30) }`
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    /// HTTP-like status code.
    pub code: i32,
    /// Error name in SCREAMING_SNAKE_CASE with digits removed.
    pub name: String,
    /// Numeric suffix extracted from the name, if any.
    pub value: Option<u32>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC {}: {}", self.code, self.name)?;
        if let Some(v) = self.value {
            write!(f, " (value: {v})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

impl RpcError {
    /// Parse a raw error message like `"FLOOD_WAIT_30"` into an `RpcError`.
    pub fn from_telegram(code: i32, message: &str) -> Self {
        if let Some(idx) = message.rfind('_') {
            let suffix = &message[idx + 1..];
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(v) = suffix.parse::<u32>() {
                    let name = message[..idx].to_string();
                    return Self { code, name, value: Some(v) };
                }
            }
        }
        Self { code, name: message.to_string(), value: None }
    }

    /// Match on the error name, with optional wildcard prefix/suffix `'*'`.
    ///
    /// # Examples
    /// - `err.is("FLOOD_WAIT")`: exact match
    /// - `err.is("PHONE_CODE_*")`: starts-with match
    /// - `err.is("*_INVALID")`: ends-with match
    pub fn is(&self, pattern: &str) -> bool {
        if let Some(prefix) = pattern.strip_suffix('*') {
            self.name.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            self.name.ends_with(suffix)
        } else {
            self.name == pattern
        }
    }

    /// Returns the flood-wait duration in seconds, if this is a FLOOD_WAIT error.
    pub fn flood_wait_seconds(&self) -> Option<u64> {
        if self.code == 420 && self.name == "FLOOD_WAIT" {
            self.value.map(|v| v as u64)
        } else {
            None
        }
    }
}

impl From<types::RpcError> for RpcError {
    fn from(e: types::RpcError) -> Self { Self::from_telegram(e.error_code, &e.error_message) }
}

// ─── InvocationError ──────────────────────────────────────────────────────────

/// The error type returned from any [`crate::Client`] method that talks to the server.
#[derive(Debug)]
pub enum InvocationError {
    /// The server rejected the request.
    Rpc(RpcError),
    /// Network / I/O failure.
    Io(io::Error),
    /// The stream framing broke, or the server sent a transport error code.
    Transport(TransportError),
    /// Creating an auth key failed.
    Negotiation(NegotiationError),
    /// Response deserialization failed.
    Deserialize(String),
    /// The server refused the message itself (`bad_msg_notification`) and it
    /// could not be resent.
    BadMessage(BadMessage),
    /// Local randomness or encryption failed.
    Crypto(CryptoError),
    /// No answer within the configured timeout.
    Timeout,
    /// The caller cancelled the request.
    Cancelled,
    /// The request was dropped (e.g. the client was closed).
    Dropped,
    /// The server no longer knows our auth key and a new one could not be
    /// negotiated.
    ReauthenticationNeeded,
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc(e)                 => write!(f, "{e}"),
            Self::Io(e)                  => write!(f, "I/O error: {e}"),
            Self::Transport(e)           => write!(f, "transport error: {e}"),
            Self::Negotiation(e)         => write!(f, "auth key negotiation failed: {e}"),
            Self::Deserialize(s)         => write!(f, "deserialize error: {s}"),
            Self::BadMessage(e)          => write!(f, "bad message: {e}"),
            Self::Crypto(e)              => write!(f, "crypto error: {e}"),
            Self::Timeout                => write!(f, "request timed out"),
            Self::Cancelled              => write!(f, "request cancelled"),
            Self::Dropped                => write!(f, "request dropped"),
            Self::ReauthenticationNeeded => write!(f, "auth key rejected and re-negotiation failed"),
        }
    }
}

impl std::error::Error for InvocationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rpc(e)         => Some(e),
            Self::Io(e)          => Some(e),
            Self::Transport(e)   => Some(e),
            Self::Negotiation(e) => Some(e),
            Self::Crypto(e)      => Some(e),
            _                    => None,
        }
    }
}

impl From<io::Error> for InvocationError {
    fn from(e: io::Error) -> Self { Self::Io(e) }
}

impl From<TransportError> for InvocationError {
    fn from(e: TransportError) -> Self { Self::Transport(e) }
}

impl From<NegotiationError> for InvocationError {
    fn from(e: NegotiationError) -> Self { Self::Negotiation(e) }
}

impl From<CryptoError> for InvocationError {
    fn from(e: CryptoError) -> Self { Self::Crypto(e) }
}

impl From<strand_tl::deserialize::Error> for InvocationError {
    fn from(e: strand_tl::deserialize::Error) -> Self { Self::Deserialize(e.to_string()) }
}

impl InvocationError {
    /// Returns `true` if this is the named RPC error (supports `'*'` wildcards).
    pub fn is(&self, pattern: &str) -> bool {
        match self {
            Self::Rpc(e) => e.is(pattern),
            _            => false,
        }
    }

    /// If this is a FLOOD_WAIT error, returns how many seconds to wait.
    pub fn flood_wait_seconds(&self) -> Option<u64> {
        match self {
            Self::Rpc(e) => e.flood_wait_seconds(),
            _            => None,
        }
    }

    /// A copy for fanning one failure out to several waiters. I/O errors keep
    /// their kind and message.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::Rpc(e)                 => Self::Rpc(e.clone()),
            Self::Io(e)                  => Self::Io(io::Error::new(e.kind(), e.to_string())),
            Self::Transport(e)           => Self::Transport(e.clone()),
            Self::Negotiation(e)         => Self::Negotiation(e.clone()),
            Self::Deserialize(s)         => Self::Deserialize(s.clone()),
            Self::BadMessage(e)          => Self::BadMessage(*e),
            Self::Crypto(e)              => Self::Crypto(e.clone()),
            Self::Timeout                => Self::Timeout,
            Self::Cancelled              => Self::Cancelled,
            Self::Dropped                => Self::Dropped,
            Self::ReauthenticationNeeded => Self::ReauthenticationNeeded,
        }
    }
}

// ─── UpdateError ──────────────────────────────────────────────────────────────

/// Errors raised while turning pushes into ordered updates.
#[derive(Debug)]
pub enum UpdateError {
    /// A push body could not be decoded.
    Decode(String),
    /// The server said too many updates were pending to push them; only a
    /// difference fetch can catch up.
    TooLong,
    /// Fetching a difference failed.
    Invocation(InvocationError),
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(s)     => write!(f, "undecodable update: {s}"),
            Self::TooLong       => write!(f, "server reported too many pending updates"),
            Self::Invocation(e) => write!(f, "difference fetch failed: {e}"),
        }
    }
}

impl std::error::Error for UpdateError {}

impl From<InvocationError> for UpdateError {
    fn from(e: InvocationError) -> Self { Self::Invocation(e) }
}

impl From<strand_tl::deserialize::Error> for UpdateError {
    fn from(e: strand_tl::deserialize::Error) -> Self { Self::Decode(e.to_string()) }
}
