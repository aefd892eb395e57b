use crate::error::PacketError;

/// Smallest possible descriptor: the single required octet.
pub const DESCRIPTOR_MIN_LEN: usize = 1;

/// VP8 RTP payload descriptor.
///
/// Prefixed to every RTP payload carrying VP8 data. Carries the metadata
/// needed to reassemble partitions and frames without touching the codec
/// bitstream.
///
/// https://datatracker.ietf.org/doc/html/rfc7741#section-4.2
///
/// ```text
///      0 1 2 3 4 5 6 7
///     +-+-+-+-+-+-+-+-+
///     |X|R|N|S|R| PID | (REQUIRED)
///     +-+-+-+-+-+-+-+-+
/// X:  |I|L|T|K| RSV   | (OPTIONAL)
///     +-+-+-+-+-+-+-+-+
/// I:  |M| PictureID   | (OPTIONAL)
///     +-+-+-+-+-+-+-+-+
/// L:  |   tl0picidx   | (OPTIONAL)
///     +-+-+-+-+-+-+-+-+
/// T/K:|tid|Y| KEYIDX  | (OPTIONAL)
///     +-+-+-+-+-+-+-+-+
/// ```
///
/// The X bit and the I/L/T/K presence flags are never stored; they are
/// derived from which optional fields are set, so an encoded descriptor is
/// always the minimal byte pattern for its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PayloadDescriptor {
    /// N bit. The frame this packet belongs to is not referenced by any
    /// other frame and can be dropped without corrupting the stream.
    pub non_reference: bool,
    /// S bit. First payload octet is the start of a new VP8 partition.
    pub start_of_partition: bool,
    /// 3-bit partition index of the first partition fragment in the packet.
    pub pid: u8,
    /// PictureID, if the I bit was set.
    pub picture_id: Option<PictureId>,
    /// TL0PICIDX, if the L bit was set.
    pub tl0_pic_idx: Option<u8>,
    /// TID and layer sync bit, if the T bit was set.
    pub temporal: Option<TemporalLayer>,
    /// KEYIDX, if the K bit was set.
    pub key_idx: Option<u8>,
}

/// PictureID in its short or long wire form.
///
/// The two forms are kept distinct so re-encoding a parsed descriptor
/// reproduces the original bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureId {
    /// M=0, 7 bits in one byte.
    SevenBit(u8),
    /// M=1, 15 bits over two bytes.
    FifteenBit(u16),
}

/// Temporal layer fields from the T/K byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalLayer {
    /// 2-bit temporal layer index.
    pub tid: u8,
    /// Y bit. This frame depends only on the current TL0PICIDX base layer.
    pub layer_sync: bool,
}

impl PayloadDescriptor {
    /// Parse a descriptor from the front of an RTP payload.
    ///
    /// Returns the descriptor and the number of bytes it occupied. `strict`
    /// additionally rejects payloads with non-zero reserved bits; lenient
    /// mode ignores them, which is what you want for traffic from real
    /// endpoints.
    pub fn parse(buf: &[u8], strict: bool) -> Result<(Self, usize), PacketError> {
        let mut idx = 0;

        let b0 = *buf.get(idx).ok_or(PacketError::TruncatedDescriptor)?;
        idx += 1;

        // Bit 6 and bit 3 of the first octet are reserved.
        if strict && b0 & 0b0100_1000 != 0 {
            return Err(PacketError::ReservedBitSet);
        }

        let extended = b0 & 0x80 != 0;

        let mut desc = PayloadDescriptor {
            non_reference: b0 & 0x20 != 0,
            start_of_partition: b0 & 0x10 != 0,
            pid: b0 & 0x07,
            ..Default::default()
        };

        if !extended {
            return Ok((desc, idx));
        }

        let b1 = *buf.get(idx).ok_or(PacketError::TruncatedDescriptor)?;
        idx += 1;

        if strict && b1 & 0x0f != 0 {
            return Err(PacketError::ReservedBitSet);
        }

        let i = b1 & 0x80 != 0;
        let l = b1 & 0x40 != 0;
        let t = b1 & 0x20 != 0;
        let k = b1 & 0x10 != 0;

        if i {
            let b = *buf.get(idx).ok_or(PacketError::TruncatedDescriptor)?;
            idx += 1;
            if b & 0x80 != 0 {
                // M == 1, 15-bit PictureID over two bytes.
                let lo = *buf.get(idx).ok_or(PacketError::TruncatedDescriptor)?;
                idx += 1;
                desc.picture_id = Some(PictureId::FifteenBit(
                    (((b & 0x7f) as u16) << 8) | lo as u16,
                ));
            } else {
                desc.picture_id = Some(PictureId::SevenBit(b));
            }
        }

        if l {
            desc.tl0_pic_idx = Some(*buf.get(idx).ok_or(PacketError::TruncatedDescriptor)?);
            idx += 1;
        }

        if t || k {
            let b = *buf.get(idx).ok_or(PacketError::TruncatedDescriptor)?;
            idx += 1;
            if t {
                desc.temporal = Some(TemporalLayer {
                    tid: b >> 6,
                    layer_sync: b & 0x20 != 0,
                });
            }
            if k {
                desc.key_idx = Some(b & 0x1f);
            }
        }

        Ok((desc, idx))
    }

    /// Whether the extension byte (X bit) is needed.
    pub fn extension_present(&self) -> bool {
        self.picture_id.is_some()
            || self.tl0_pic_idx.is_some()
            || self.temporal.is_some()
            || self.key_idx.is_some()
    }

    /// Encoded length in bytes. Always the minimal form for the fields set.
    pub fn encoded_len(&self) -> usize {
        let mut n = DESCRIPTOR_MIN_LEN;
        if self.extension_present() {
            n += 1;
        }
        match self.picture_id {
            Some(PictureId::SevenBit(_)) => n += 1,
            Some(PictureId::FifteenBit(_)) => n += 2,
            None => {}
        }
        if self.tl0_pic_idx.is_some() {
            n += 1;
        }
        if self.temporal.is_some() || self.key_idx.is_some() {
            n += 1;
        }
        n
    }

    /// Append the wire form of this descriptor to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let mut b0 = self.pid & 0x07;
        if self.extension_present() {
            b0 |= 0x80;
        }
        if self.non_reference {
            b0 |= 0x20;
        }
        if self.start_of_partition {
            b0 |= 0x10;
        }
        out.push(b0);

        if !self.extension_present() {
            return;
        }

        let mut b1 = 0;
        if self.picture_id.is_some() {
            b1 |= 0x80;
        }
        if self.tl0_pic_idx.is_some() {
            b1 |= 0x40;
        }
        if self.temporal.is_some() {
            b1 |= 0x20;
        }
        if self.key_idx.is_some() {
            b1 |= 0x10;
        }
        out.push(b1);

        match self.picture_id {
            Some(PictureId::SevenBit(v)) => out.push(v & 0x7f),
            Some(PictureId::FifteenBit(v)) => {
                out.push(0x80 | ((v >> 8) as u8 & 0x7f));
                out.push(v as u8);
            }
            None => {}
        }

        if let Some(v) = self.tl0_pic_idx {
            out.push(v);
        }

        if self.temporal.is_some() || self.key_idx.is_some() {
            let mut b = 0;
            if let Some(t) = self.temporal {
                b |= (t.tid & 0x03) << 6;
                if t.layer_sync {
                    b |= 0x20;
                }
            }
            if let Some(k) = self.key_idx {
                b |= k & 0x1f;
            }
            out.push(b);
        }
    }
}
