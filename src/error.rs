use thiserror::Error;

/// Failures raised while decoding on-disk structures from the image.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The image ended before `expected` bytes could be read at `offset`.
    #[error("short read at offset {offset:#x}: expected {expected} bytes")]
    ShortRead { offset: u64, expected: usize },

    #[error("invalid magic: expected {expected:#06x}, got {actual:#06x}")]
    BadMagic { expected: u16, actual: u16 },

    /// A nonzero block pointer addresses a block past the end of the volume.
    #[error("block {block} is beyond the end of the image ({blocks_count} blocks)")]
    BlockOutOfRange { block: u64, blocks_count: u64 },

    /// `offset` cannot be added to the partition start without overflowing.
    #[error("offset {offset:#x} overflows partition start {base:#x}")]
    OffsetOverflow { base: u64, offset: u64 },

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("I/O error at offset {offset:#x}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: std::io::Error,
    },
}
