/// Maps 16-bit RTP sequence numbers to wraparound-free 32-bit values.
///
/// The first observed value seeds the reference. Every later value is
/// interpreted with the signed 16-bit delta closest to zero against the low
/// 16 bits of the last extended value, so the counter follows both forward
/// rollover and slightly-backward out-of-order arrival without ever having
/// two candidate readings.
#[derive(Debug, Clone, Default)]
pub struct ExtendedSeq {
    last: Option<u32>,
}

impl ExtendedSeq {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the next raw sequence number.
    ///
    /// Returns `None` for the one genuinely ambiguous case, a delta of
    /// exactly -32768, where forward and backward interpretation are equally
    /// close. Such a packet is at least half the sequence space away from
    /// anything recently seen and cannot be placed.
    pub fn next(&mut self, raw: u16) -> Option<u32> {
        let Some(last) = self.last else {
            self.last = Some(raw as u32);
            return Some(raw as u32);
        };

        let delta = raw.wrapping_sub(last as u16) as i16;
        if delta == i16::MIN {
            trace!("Ambiguous sequence number {} (last extended {})", raw, last);
            return None;
        }

        // Backward past the stream origin clamps to zero.
        let ext = (i64::from(last) + i64::from(delta)).max(0) as u32;
        self.last = Some(ext);
        Some(ext)
    }
}
