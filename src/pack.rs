use std::collections::VecDeque;

use crate::descriptor::{PayloadDescriptor, PictureId, TemporalLayer};
use crate::error::PacketError;
use crate::FilterInfo;

/// Per-frame metadata the encoder layer supplies alongside the partitions.
///
/// Every field is copied into each packet's payload descriptor unchanged;
/// the packer computes nothing here.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameMeta {
    /// PictureID to stamp on the frame. `None` leaves the I bit unset
    /// unless the packer was configured to generate its own sequence.
    pub picture_id: Option<PictureId>,
    pub tl0_pic_idx: Option<u8>,
    pub temporal: Option<TemporalLayer>,
    pub key_idx: Option<u8>,
    /// No other frame references this one.
    pub non_reference: bool,
}

/// One RTP payload ready for header wrapping and transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketOut {
    /// Payload descriptor followed by the partition fragment.
    pub payload: Vec<u8>,
    /// Maps to the RTP marker bit.
    pub last_packet_of_frame: bool,
}

/// Packetizer: splits one partitioned VP8 frame into RTP payloads.
///
/// Stateless between frames apart from configuration and the optional
/// generated PictureID sequence. Packets are emitted in transmission order,
/// partition by partition; receivers lean on that order, so it is part of
/// the wire contract, not a nicety.
#[derive(Debug)]
pub struct Packer {
    nb_partitions: u8,
    max_payload_len: usize,
    /// 15-bit generated PictureID, when enabled. Seeded randomly as RFC 7741
    /// asks, bumped once per frame.
    picture_id: Option<u16>,
}

impl Packer {
    /// Capability descriptor for embedding in a filter graph.
    pub const INFO: FilterInfo = FilterInfo {
        name: "vp8 packer",
        inputs: 1,
        outputs: 1,
    };

    /// `nb_partitions` is the most partitions a frame may carry;
    /// `max_payload_len` is the negotiated per-packet payload budget,
    /// descriptor included.
    pub fn new(nb_partitions: u8, max_payload_len: usize) -> Self {
        Packer {
            nb_partitions,
            max_payload_len,
            picture_id: None,
        }
    }

    /// Generate a PictureID sequence for frames whose metadata carries none.
    pub fn with_picture_id(mut self) -> Self {
        self.picture_id = Some(fastrand::u16(..) & 0x7fff);
        self
    }

    /// Packetize one frame. `partitions` are the encoder's true partition
    /// buffers in index order; packets land in `out` in transmission order.
    pub fn process(
        &mut self,
        partitions: &[Vec<u8>],
        meta: &FrameMeta,
        out: &mut VecDeque<PacketOut>,
    ) -> Result<(), PacketError> {
        if partitions.is_empty() {
            return Err(PacketError::EmptyFrame);
        }
        if partitions.len() > self.nb_partitions as usize {
            return Err(PacketError::TooManyPartitions(
                partitions.len(),
                self.nb_partitions,
            ));
        }

        let picture_id = meta
            .picture_id
            .or(self.picture_id.map(PictureId::FifteenBit));

        for (index, partition) in partitions.iter().enumerate() {
            let last_partition = index + 1 == partitions.len();
            let mut offset = 0;
            let mut start_of_partition = true;

            loop {
                let descriptor = PayloadDescriptor {
                    non_reference: meta.non_reference,
                    start_of_partition,
                    pid: (index & 0x07) as u8,
                    picture_id,
                    tl0_pic_idx: meta.tl0_pic_idx,
                    temporal: meta.temporal,
                    key_idx: meta.key_idx,
                };

                let header_len = descriptor.encoded_len();
                if header_len >= self.max_payload_len {
                    return Err(PacketError::PayloadBudgetTooSmall(self.max_payload_len));
                }

                let take = (self.max_payload_len - header_len).min(partition.len() - offset);
                let mut payload = Vec::with_capacity(header_len + take);
                descriptor.encode_into(&mut payload);
                payload.extend_from_slice(&partition[offset..offset + take]);
                offset += take;

                let partition_done = offset >= partition.len();
                out.push_back(PacketOut {
                    payload,
                    last_packet_of_frame: last_partition && partition_done,
                });

                start_of_partition = false;
                if partition_done {
                    break;
                }
            }
        }

        if let Some(id) = self.picture_id.as_mut() {
            *id = (*id + 1) & 0x7fff;
        }

        trace!(
            "Packed frame: {} partitions into {} packets",
            partitions.len(),
            out.len()
        );

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn packets(
        packer: &mut Packer,
        partitions: &[Vec<u8>],
        meta: &FrameMeta,
    ) -> Vec<PacketOut> {
        let mut out = VecDeque::new();
        packer.process(partitions, meta, &mut out).expect("packed");
        out.into()
    }

    #[test]
    fn splits_at_payload_budget() {
        let mut packer = Packer::new(2, 3);
        let parts = vec![vec![0x90, 0x90, 0x90], vec![0x91, 0x91]];
        let out = packets(&mut packer, &parts, &FrameMeta::default());

        // Descriptor is one byte, so two data bytes per packet.
        let expected: Vec<(&[u8], bool)> = vec![
            (&[0x10, 0x90, 0x90], false),
            (&[0x00, 0x90], false),
            (&[0x11, 0x91, 0x91], true),
        ];
        assert_eq!(out.len(), expected.len());
        for (got, (payload, last)) in out.iter().zip(expected) {
            assert_eq!(got.payload, payload);
            assert_eq!(got.last_packet_of_frame, last);
        }
    }

    #[test]
    fn start_bit_once_per_partition() {
        let mut packer = Packer::new(1, 2);
        let parts = vec![vec![1, 2, 3, 4]];
        let out = packets(&mut packer, &parts, &FrameMeta::default());
        assert_eq!(out.len(), 4);
        let starts: Vec<bool> = out
            .iter()
            .map(|p| p.payload[0] & 0x10 != 0)
            .collect();
        assert_eq!(starts, [true, false, false, false]);
        assert!(out[3].last_packet_of_frame);
    }

    #[test]
    fn metadata_lands_in_every_packet() {
        let mut packer = Packer::new(1, 8);
        let meta = FrameMeta {
            picture_id: Some(PictureId::FifteenBit(0x234)),
            tl0_pic_idx: Some(7),
            temporal: Some(TemporalLayer {
                tid: 1,
                layer_sync: true,
            }),
            key_idx: Some(3),
            non_reference: true,
        };
        let out = packets(&mut packer, &[vec![0u8; 5]], &meta);
        assert!(out.len() > 1);
        for p in &out {
            let (d, _) = PayloadDescriptor::parse(&p.payload, true).expect("valid descriptor");
            assert_eq!(d.picture_id, meta.picture_id);
            assert_eq!(d.tl0_pic_idx, meta.tl0_pic_idx);
            assert_eq!(d.temporal, meta.temporal);
            assert_eq!(d.key_idx, meta.key_idx);
            assert!(d.non_reference);
        }
    }

    #[test]
    fn generated_picture_id_advances_per_frame() {
        let mut packer = Packer::new(1, 10).with_picture_id();
        let first = packets(&mut packer, &[vec![1]], &FrameMeta::default());
        let second = packets(&mut packer, &[vec![2]], &FrameMeta::default());

        let (d1, _) = PayloadDescriptor::parse(&first[0].payload, true).expect("first");
        let (d2, _) = PayloadDescriptor::parse(&second[0].payload, true).expect("second");

        let (Some(PictureId::FifteenBit(a)), Some(PictureId::FifteenBit(b))) =
            (d1.picture_id, d2.picture_id)
        else {
            panic!("expected generated 15-bit picture ids");
        };
        assert_eq!(b, (a + 1) & 0x7fff);
    }

    #[test]
    fn caller_meta_beats_generated_picture_id() {
        let mut packer = Packer::new(1, 10).with_picture_id();
        let meta = FrameMeta {
            picture_id: Some(PictureId::SevenBit(5)),
            ..Default::default()
        };
        let out = packets(&mut packer, &[vec![1]], &meta);
        let (d, _) = PayloadDescriptor::parse(&out[0].payload, true).expect("descriptor");
        assert_eq!(d.picture_id, Some(PictureId::SevenBit(5)));
    }

    #[test]
    fn contract_violations_are_errors() {
        let mut packer = Packer::new(2, 10);
        let mut out = VecDeque::new();

        let r = packer.process(&[], &FrameMeta::default(), &mut out);
        assert_eq!(r, Err(PacketError::EmptyFrame));

        let three = vec![vec![1], vec![2], vec![3]];
        let r = packer.process(&three, &FrameMeta::default(), &mut out);
        assert_eq!(r, Err(PacketError::TooManyPartitions(3, 2)));

        // Budget of one byte fits the descriptor but never any data.
        let mut tight = Packer::new(1, 1);
        let r = tight.process(&[vec![1]], &FrameMeta::default(), &mut out);
        assert_eq!(r, Err(PacketError::PayloadBudgetTooSmall(1)));

        assert!(out.is_empty());
    }

    #[test]
    fn filter_info() {
        assert_eq!(Packer::INFO.inputs, 1);
        assert_eq!(Packer::INFO.outputs, 1);
    }
}
