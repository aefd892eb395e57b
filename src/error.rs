use thiserror::Error;

/// Errors arising in packet- and depacketization.
///
/// Network-corrupt input never reaches this enum as anything but
/// [`PacketError::TruncatedDescriptor`] / [`PacketError::ReservedBitSet`];
/// the remaining variants report caller contract violations on the packing
/// side.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Descriptor flags promise more bytes than the payload holds.
    #[error("payload descriptor truncated")]
    TruncatedDescriptor,

    /// A reserved bit is set and strict parsing was requested.
    #[error("reserved bit set in payload descriptor")]
    ReservedBitSet,

    /// The packer was handed a frame with no partitions.
    #[error("no partitions to packetize")]
    EmptyFrame,

    /// The packer was handed more partitions than it was configured for.
    #[error("frame has {0} partitions, packer configured for {1}")]
    TooManyPartitions(usize, u8),

    /// The payload budget cannot fit a descriptor plus at least one byte.
    #[error("max payload length {0} cannot fit descriptor and data")]
    PayloadBudgetTooSmall(usize),
}
