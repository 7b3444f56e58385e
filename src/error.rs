use thiserror::Error;

/// I/O errors that can occur when reading from source storage
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Error from the local filesystem
    #[error("Filesystem error: {0}")]
    Filesystem(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),
}

/// The URI component a parse error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Identifier,
    Region,
    Size,
    Rotation,
    Quality,
    Format,
}

impl Component {
    pub const fn name(self) -> &'static str {
        match self {
            Component::Identifier => "identifier",
            Component::Region => "region",
            Component::Size => "size",
            Component::Rotation => "rotation",
            Component::Quality => "quality",
            Component::Format => "format",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Malformed or out-of-range request input.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Invalid {component}: {message}")]
pub struct ParseError {
    /// Which URI component was rejected
    pub component: Component,

    /// Human-readable reason
    pub message: String,
}

impl ParseError {
    pub fn new(component: Component, message: impl Into<String>) -> Self {
        Self {
            component,
            message: message.into(),
        }
    }
}

/// Errors raised while reading or writing image data
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    /// I/O error while reading the source
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Source format is recognized but cannot be served (maps to 415)
    #[error("Unsupported source format: {0}")]
    UnsupportedFormat(String),

    /// Source bytes are corrupt or structurally invalid (maps to 500)
    #[error("Malformed source: {0}")]
    Malformed(String),

    /// Requested tier does not exist
    #[error("Invalid tier {tier}: source has {count} tiers")]
    InvalidTier { tier: usize, count: usize },

    /// Pixel decoding failed
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// Output encoding failed
    #[error("Failed to encode image: {0}")]
    Encode(String),
}

/// Request-level error taxonomy surfaced to HTTP clients.
#[derive(Debug, Clone, Error)]
pub enum ImageError {
    /// Client input could not be parsed
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The identifier has no resolvable source
    #[error("Image not found: {identifier}")]
    NotFound { identifier: String },

    /// The request violates a server-side size policy
    #[error("Size restricted: {reason}")]
    SizeRestricted { reason: String },

    /// The policy collaborator denied access
    #[error("Access to {identifier} is forbidden")]
    Forbidden { identifier: String },

    /// The requested region does not intersect the image
    #[error("Requested region is outside the image bounds")]
    EmptyResult,

    /// The source could not be read or decoded
    #[error(transparent)]
    Source(#[from] CodecError),

    /// A derivative computation failed or was aborted
    #[error("Computation failed: {message}")]
    ComputationFailure { message: String },
}

impl ImageError {
    /// Lift a codec error, turning missing objects into `NotFound`.
    pub fn from_codec(identifier: &str, err: CodecError) -> Self {
        match err {
            CodecError::Io(IoError::NotFound(_)) => ImageError::NotFound {
                identifier: identifier.to_string(),
            },
            other => ImageError::Source(other),
        }
    }
}
