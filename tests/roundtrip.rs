use std::collections::VecDeque;
use std::sync::Once;

use vp8rtp::{FrameMeta, Packer, PictureId, RtpPacket, TemporalLayer, Unpacker};

pub fn init_log() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    static START: Once = Once::new();

    START.call_once(|| {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(env_filter)
            .init();
    });
}

/// Wrap packer output in the RTP header fields the unpacker reads.
fn to_rtp(
    out: impl IntoIterator<Item = vp8rtp::PacketOut>,
    first_seq: u16,
    timestamp: u32,
) -> Vec<RtpPacket> {
    out.into_iter()
        .enumerate()
        .map(|(i, p)| RtpPacket {
            payload: p.payload,
            seq: first_seq.wrapping_add(i as u16),
            timestamp,
            marker: p.last_packet_of_frame,
        })
        .collect()
}

fn synthetic_partition(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

#[test]
fn packer_unpacker_inverse() {
    init_log();

    let partitions = vec![
        synthetic_partition(700, 0x11),
        synthetic_partition(180, 0x77),
    ];
    let meta = FrameMeta {
        picture_id: Some(PictureId::FifteenBit(1000)),
        tl0_pic_idx: Some(3),
        temporal: Some(TemporalLayer {
            tid: 0,
            layer_sync: false,
        }),
        key_idx: None,
        non_reference: false,
    };

    let mut packer = Packer::new(2, 200);
    let mut packets = VecDeque::new();
    packer
        .process(&partitions, &meta, &mut packets)
        .expect("packetize");
    assert!(packets.len() > 2, "small budget must split the frame");

    let mut unpacker = Unpacker::new();
    for p in to_rtp(packets, 400, 90_000) {
        unpacker.push(p);
    }

    let frame = unpacker.pop_frame().expect("one reassembled frame");
    let expected: Vec<u8> = partitions.concat();
    assert_eq!(frame, expected);
    assert_eq!(unpacker.pop_frame(), None);
}

#[test]
fn inverse_across_seq_wraparound() {
    init_log();

    let partitions = vec![synthetic_partition(500, 0x42)];
    let mut packer = Packer::new(1, 100).with_picture_id();
    let mut packets = VecDeque::new();
    packer
        .process(&partitions, &FrameMeta::default(), &mut packets)
        .expect("packetize");

    // Frame straddles the 16-bit sequence rollover.
    let first_seq = u16::MAX - 2;
    let mut unpacker = Unpacker::new();
    for p in to_rtp(packets, first_seq, 180_000) {
        unpacker.push(p);
    }

    assert_eq!(unpacker.pop_frame(), Some(partitions.concat()));
}

#[test]
fn consecutive_frames_stay_in_order() {
    init_log();

    let mut packer = Packer::new(2, 60).with_picture_id();
    let mut unpacker = Unpacker::new();

    let mut seq = 100u16;
    let mut expected = Vec::new();

    for n in 0..5u8 {
        let partitions = vec![
            synthetic_partition(90, n),
            synthetic_partition(40, n.wrapping_add(0x80)),
        ];
        let mut packets = VecDeque::new();
        packer
            .process(&partitions, &FrameMeta::default(), &mut packets)
            .expect("packetize");

        let count = packets.len() as u16;
        for p in to_rtp(packets, seq, 3000 * n as u32) {
            unpacker.push(p);
        }
        seq = seq.wrapping_add(count);
        expected.push(partitions.concat());
    }

    for want in expected {
        assert_eq!(unpacker.pop_frame(), Some(want));
    }
    assert_eq!(unpacker.pop_frame(), None);
    assert_eq!(unpacker.frames_discarded(), 0);
}
