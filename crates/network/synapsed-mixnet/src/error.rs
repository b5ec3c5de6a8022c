//! Error types for the mixnet.
//!
//! Errors are grouped by the class of failure they represent. Every class is
//! handled locally by the component that detects it: onion and routing errors
//! drop a single message, protocol and transport errors tear down a single
//! connection. Nothing here is fatal to the process.

use crate::types::NodeId;
use std::fmt;
use thiserror::Error;

/// Type alias for Results in this crate.
pub type Result<T> = std::result::Result<T, MixnetError>;

/// Main error type for mixnet operations.
#[derive(Error, Debug)]
pub enum MixnetError {
    /// Onion build/peel errors
    #[error("Onion error: {0}")]
    Onion(#[from] OnionError),

    /// Hop validation and directory routing errors
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    /// Wire protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Network transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The mix engine no longer accepts messages
    #[error("Mix engine is stopped")]
    EngineStopped,

    /// Shutdown did not complete cleanly
    #[error("Shutdown error: {0}")]
    Shutdown(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while building or peeling onion layers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OnionError {
    #[error("Onion path is empty")]
    EmptyPath,

    #[error("No public key known for node {0}")]
    UnknownRecipientKey(NodeId),

    #[error("No private key known for node {0}")]
    UnknownPrivateKey(NodeId),

    #[error("Failed to unwrap layer key: {0}")]
    KeyUnwrapFailed(String),

    #[error("Layer payload failed authentication")]
    PayloadDecryptFailed,

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Malformed onion layer: {0}")]
    MalformedLayer(String),
}

/// Errors raised when a message is not addressed to us or cannot be routed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("Invalid hop index {index} for path of length {path_len}")]
    InvalidHopIndex { index: usize, path_len: usize },

    #[error("Message for {expected} delivered to {local}")]
    MisroutedMessage { expected: NodeId, local: NodeId },

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Delivered content is not valid UTF-8")]
    InvalidContent,
}

/// Errors in the framing or schema of wire records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Bad handshake: {0}")]
    BadHandshake(String),

    #[error("Frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    #[error("Unsupported wire version {0}")]
    UnsupportedVersion(u8),
}

/// Errors establishing or using a peer connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection to {node} unavailable: {reason}")]
    ConnectionUnavailable { node: NodeId, reason: String },

    #[error("Connection closed")]
    ConnectionClosed,
}

impl MixnetError {
    /// Classifies the error for handling and metrics.
    pub fn class(&self) -> ErrorClass {
        match self {
            MixnetError::Onion(OnionError::EmptyPath)
            | MixnetError::Onion(OnionError::UnknownRecipientKey(_))
            | MixnetError::Onion(OnionError::UnknownPrivateKey(_)) => ErrorClass::Configuration,
            MixnetError::Onion(_) => ErrorClass::Cryptographic,
            MixnetError::Routing(_) => ErrorClass::Routing,
            MixnetError::Protocol(_) => ErrorClass::Protocol,
            MixnetError::Transport(_) | MixnetError::Io(_) => ErrorClass::Network,
            MixnetError::Configuration(_) => ErrorClass::Configuration,
            MixnetError::EngineStopped | MixnetError::Shutdown(_) => ErrorClass::Resource,
        }
    }

    /// Returns the severity of this error for logging purposes.
    pub fn severity(&self) -> ErrorSeverity {
        match self.class() {
            ErrorClass::Configuration => ErrorSeverity::Critical,
            ErrorClass::Cryptographic | ErrorClass::Protocol | ErrorClass::Network => ErrorSeverity::Major,
            ErrorClass::Routing | ErrorClass::Resource => ErrorSeverity::Minor,
        }
    }

    /// Whether the message that caused this error must be dropped.
    ///
    /// Mixnets never acknowledge or retry, so every per-message failure is
    /// terminal for that message instance.
    pub fn is_terminal_for_message(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Cryptographic | ErrorClass::Routing | ErrorClass::Configuration
        )
    }

    /// Whether the connection that produced this error must be torn down.
    pub fn is_fatal_for_connection(&self) -> bool {
        matches!(self.class(), ErrorClass::Protocol | ErrorClass::Network)
    }
}

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Misconfiguration that needs operator attention
    Critical,
    /// Errors that lose a message or a connection
    Major,
    /// Expected noise on an open relay
    Minor,
}

/// Error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ErrorClass {
    /// Malformed frame, bad handshake
    Protocol,
    /// Hop index out of bounds, identity mismatch, unknown next hop
    Routing,
    /// Key unwrap or payload authentication failure
    Cryptographic,
    /// Dial, read or write failure
    Network,
    /// Engine stopped, shutdown timeouts
    Resource,
    /// Missing keys or invalid settings
    Configuration,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Protocol => write!(f, "protocol"),
            ErrorClass::Routing => write!(f, "routing"),
            ErrorClass::Cryptographic => write!(f, "cryptographic"),
            ErrorClass::Network => write!(f, "network"),
            ErrorClass::Resource => write!(f, "resource"),
            ErrorClass::Configuration => write!(f, "configuration"),
        }
    }
}

impl From<serde_json::Error> for MixnetError {
    fn from(err: serde_json::Error) -> Self {
        MixnetError::Protocol(ProtocolError::MalformedFrame(err.to_string()))
    }
}

impl From<toml::de::Error> for MixnetError {
    fn from(err: toml::de::Error) -> Self {
        MixnetError::Configuration(format!("Invalid directory file: {}", err))
    }
}
