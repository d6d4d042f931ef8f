use core::fmt;

/// Decoding failures for the fixed-layout records in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiError {
    /// The buffer is shorter than the record requires.
    Truncated { needed: usize, got: usize },
    /// A message class tag outside Request/Reply/Event.
    UnknownClass(u32),
    /// An executable header declaring more segments than supported.
    TooManySegments(u32),
    /// An event record with an unrecognised type tag.
    UnknownEvent(u32),
}

impl fmt::Display for AbiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiError::Truncated { needed, got } => {
                write!(f, "record truncated: need {} bytes, got {}", needed, got)
            }
            AbiError::UnknownClass(tag) => write!(f, "unknown message class {}", tag),
            AbiError::TooManySegments(n) => write!(f, "executable declares {} segments", n),
            AbiError::UnknownEvent(tag) => write!(f, "unknown event type {}", tag),
        }
    }
}

impl core::error::Error for AbiError {}

pub(crate) fn ensure_len(buf: &[u8], needed: usize) -> Result<(), AbiError> {
    if buf.len() < needed {
        return Err(AbiError::Truncated { needed, got: buf.len() });
    }
    Ok(())
}
