use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Command name is empty
    EmptyCommand,
    /// Parameter would shadow the command name key
    ReservedKey(String),
    /// Floating-point parameter is NaN or infinite
    NonFinite(String),
    /// JSON serialization failed
    Serialization(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCommand => write!(f, "Command name is empty"),
            Self::ReservedKey(key) => write!(f, "Reserved parameter name: {}", key),
            Self::NonFinite(key) => write!(f, "Non-finite value for parameter: {}", key),
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for CodecError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Nothing but whitespace was received
    Empty,
    /// No balanced `{...}` span in the input
    NoObject,
    /// An object span was found but is not valid JSON
    Malformed(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty reply"),
            Self::NoObject => write!(f, "No JSON object in reply"),
            Self::Malformed(e) => write!(f, "Malformed reply: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}
