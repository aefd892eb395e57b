use std::collections::VecDeque;

use crate::descriptor::PayloadDescriptor;
use crate::seq::ExtendedSeq;
use crate::FilterInfo;

/// An unfinished frame is dropped once this many newer-timestamped frames
/// have started. Counted in frames, not wall clock; the unpacker has no
/// clock access.
pub const MAX_FRAME_AGE: usize = 4;

/// A frame missing more than this many sequence slots is structurally
/// hopeless and dropped without waiting for the age window.
pub const MAX_SEQ_GAP: u32 = 16;

/// First partition plus up to eight token partitions.
pub const MAX_PARTITIONS: usize = 9;

/// A frame spanning more sequence slots than this is dropped outright.
/// Caps per-frame memory when the marker never arrives and nothing else
/// bounds the run.
pub const MAX_FRAME_SPAN: u32 = 1024;

/// One RTP payload handed to the unpacker, annotated with the three header
/// fields the reassembly needs. The caller parses the RTP header; this crate
/// never does.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    /// Payload descriptor bytes followed by VP8 partition bytes.
    pub payload: Vec<u8>,
    /// Raw 16-bit RTP sequence number.
    pub seq: u16,
    /// 32-bit RTP timestamp. All packets of one frame share it.
    pub timestamp: u32,
    /// RTP marker bit: this packet ends the frame.
    pub marker: bool,
}

/// Reassembly error codes, scoped to the smallest unit affected and ordered
/// by severity. `Incomplete*` are transient waiting states; `Invalid*` and
/// `InvalidPayloadDescriptor` are terminal for the unit carrying them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ErrorCode {
    #[default]
    None,
    IncompletePartition,
    IncompleteFrame,
    InvalidPartition,
    InvalidFrame,
    InvalidPayloadDescriptor,
}

#[derive(Debug)]
struct Packet {
    /// Partition bytes, descriptor stripped. Empty when the descriptor was
    /// unparseable.
    data: Vec<u8>,
    descriptor: Option<PayloadDescriptor>,
    extended_seq: u32,
    error: ErrorCode,
    last_of_frame: bool,
}

impl Packet {
    fn start_of_partition(&self) -> bool {
        self.descriptor.map(|d| d.start_of_partition).unwrap_or(false)
    }

    fn pid(&self) -> Option<u8> {
        self.descriptor.map(|d| d.pid)
    }
}

/// Packets believed to belong to one VP8 partition, ordered by extended
/// sequence number.
#[derive(Debug, Default)]
struct Partition {
    packets: Vec<Packet>,
    last_of_frame: bool,
}

impl Partition {
    fn from_packet(packet: Packet) -> Self {
        let mut p = Partition::default();
        p.insert(packet);
        p
    }

    fn first_seq(&self) -> u32 {
        self.packets[0].extended_seq
    }

    fn last_seq(&self) -> u32 {
        self.packets[self.packets.len() - 1].extended_seq
    }

    fn has_start(&self) -> bool {
        self.packets[0].start_of_partition()
    }

    /// Partition index claimed by the descriptor of the starting packet.
    fn pid(&self) -> Option<u8> {
        if self.has_start() {
            self.packets[0].pid()
        } else {
            None
        }
    }

    fn insert(&mut self, packet: Packet) {
        self.last_of_frame |= packet.last_of_frame;
        let pos = self
            .packets
            .partition_point(|p| p.extended_seq < packet.extended_seq);
        self.packets.insert(pos, packet);
    }

    /// Detach the packets strictly after `seq`, keeping order.
    fn split_off_after(&mut self, seq: u32) -> Vec<Packet> {
        let pos = self.packets.partition_point(|p| p.extended_seq <= seq);
        let tail = self.packets.split_off(pos);
        // The marker packet may have moved to the detached tail.
        self.last_of_frame = self.packets.iter().any(|p| p.last_of_frame);
        tail
    }

    fn worst_packet_error(&self) -> ErrorCode {
        self.packets
            .iter()
            .map(|p| p.error)
            .max()
            .unwrap_or_default()
    }

    /// Error state of the partition in isolation: internal gaps are a
    /// waiting state, a continuation packet claiming a different partition
    /// index than the start is irreconcilable.
    fn status(&self) -> ErrorCode {
        let worst = self.worst_packet_error();
        if worst == ErrorCode::InvalidPayloadDescriptor {
            return worst;
        }
        if let Some(pid) = self.pid() {
            let conflict = self.packets[1..]
                .iter()
                .any(|p| p.pid().map(|o| o != pid).unwrap_or(false));
            if conflict {
                return ErrorCode::InvalidPartition;
            }
        } else {
            // Still waiting for the start-of-partition packet.
            return ErrorCode::IncompletePartition;
        }
        let span = self.last_seq() - self.first_seq() + 1;
        if span != self.packets.len() as u32 {
            return ErrorCode::IncompletePartition;
        }
        ErrorCode::None
    }

    fn byte_len(&self) -> usize {
        self.packets.iter().map(|p| p.data.len()).sum()
    }
}

/// Result of judging a frame against everything received so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameStatus {
    /// Could still complete; keep waiting.
    Assembling,
    /// Every slot from the first partition start to the frame end is filled.
    Complete,
    /// Structurally impossible to complete.
    Invalid(ErrorCode),
}

/// Partitions believed to belong to one VP8 frame, ordered by partition
/// start sequence number.
#[derive(Debug)]
struct Frame {
    timestamp: u32,
    partitions: Vec<Partition>,
    error: ErrorCode,
    outputted: bool,
    discarded: bool,
}

impl Frame {
    fn is_terminal(&self) -> bool {
        self.outputted || self.discarded
    }

    fn new(timestamp: u32, packet: Packet) -> Self {
        Frame {
            timestamp,
            partitions: vec![Partition::from_packet(packet)],
            error: ErrorCode::IncompleteFrame,
            outputted: false,
            discarded: false,
        }
    }

    fn min_seq(&self) -> u32 {
        self.partitions[0].first_seq()
    }

    fn max_seq(&self) -> u32 {
        self.partitions[self.partitions.len() - 1].last_seq()
    }

    fn packet_count(&self) -> u32 {
        self.partitions.iter().map(|p| p.packets.len() as u32).sum()
    }

    fn contains_seq(&self, seq: u32) -> bool {
        self.partitions.iter().any(|part| {
            part.packets
                .binary_search_by_key(&seq, |p| p.extended_seq)
                .is_ok()
        })
    }

    fn marker_seq(&self) -> Option<u32> {
        self.partitions
            .iter()
            .flat_map(|part| part.packets.iter())
            .find(|p| p.last_of_frame)
            .map(|p| p.extended_seq)
    }

    /// Route one packet into the partition it belongs to.
    ///
    /// A start-of-partition packet opens a new partition at its sequence
    /// position; continuation packets already routed past that position are
    /// pulled over, and a partition that was opened headless by such
    /// continuations is absorbed. A continuation packet goes to the nearest
    /// partition starting at or before it.
    fn insert(&mut self, packet: Packet) {
        if packet.start_of_partition() {
            let seq = packet.extended_seq;
            let pos = self
                .partitions
                .iter()
                .position(|p| p.first_seq() > seq)
                .unwrap_or(self.partitions.len());

            let mut part = Partition::from_packet(packet);

            if pos > 0 {
                // Continuations of this partition may have been appended to
                // the previous one before the start arrived.
                for p in self.partitions[pos - 1].split_off_after(seq) {
                    part.insert(p);
                }
            }
            if pos < self.partitions.len() && !self.partitions[pos].has_start() {
                let headless = self.partitions.remove(pos);
                for p in headless.packets {
                    part.insert(p);
                }
            }

            self.partitions.insert(pos, part);
        } else {
            let seq = packet.extended_seq;
            let pos = self
                .partitions
                .iter()
                .rposition(|p| p.first_seq() <= seq)
                // Before every known partition start: the front partition
                // holds it until its own start shows up.
                .unwrap_or(0);
            self.partitions[pos].insert(packet);
        }
    }

    /// Judge completeness bottom-up. `next_min_seq` is the first sequence
    /// number of the following frame, if any; a frame whose marker packet
    /// was lost still ends de facto when the next frame starts on the very
    /// next sequence number.
    fn status(&mut self, next_min_seq: Option<u32>) -> FrameStatus {
        for part in &self.partitions {
            match part.status() {
                ErrorCode::InvalidPayloadDescriptor => {
                    self.error = ErrorCode::InvalidPayloadDescriptor;
                    return FrameStatus::Invalid(self.error);
                }
                ErrorCode::InvalidPartition => {
                    self.error = ErrorCode::InvalidPartition;
                    return FrameStatus::Invalid(self.error);
                }
                _ => {}
            }
        }

        if self.partitions.len() > MAX_PARTITIONS {
            self.error = ErrorCode::InvalidFrame;
            return FrameStatus::Invalid(self.error);
        }

        let span = self.max_seq() - self.min_seq() + 1;
        if span > MAX_FRAME_SPAN {
            self.error = ErrorCode::InvalidFrame;
            return FrameStatus::Invalid(self.error);
        }

        let count = self.packet_count();
        if span - count > MAX_SEQ_GAP {
            self.error = ErrorCode::InvalidFrame;
            return FrameStatus::Invalid(self.error);
        }

        if let Some(marker) = self.marker_seq() {
            if marker != self.max_seq() {
                // Data beyond the marked frame end on the same timestamp.
                self.error = ErrorCode::InvalidFrame;
                return FrameStatus::Invalid(self.error);
            }
        }

        let contiguous = span == count;
        let all_started = self.partitions.iter().all(|p| p.has_start());
        let starts_at_zero = self.partitions[0].pid() == Some(0);

        if contiguous && all_started && starts_at_zero {
            // With no gaps, a partition index disagreeing with position is a
            // conflict, not a loss.
            for (i, part) in self.partitions.iter().enumerate() {
                if part.pid() != Some((i & 0x07) as u8) {
                    self.error = ErrorCode::InvalidFrame;
                    return FrameStatus::Invalid(self.error);
                }
            }

            let marked = self.partitions[self.partitions.len() - 1].last_of_frame;
            let ended = marked || next_min_seq == Some(self.max_seq() + 1);
            if ended {
                self.error = ErrorCode::None;
                return FrameStatus::Complete;
            }
        }

        self.error = if all_started {
            ErrorCode::IncompleteFrame
        } else {
            ErrorCode::IncompletePartition
        };
        FrameStatus::Assembling
    }

    /// Concatenate partition payloads in index order, packets in sequence
    /// order, into one decodable buffer.
    fn assemble(&self) -> Vec<u8> {
        let len: usize = self.partitions.iter().map(|p| p.byte_len()).sum();
        let mut out = Vec::with_capacity(len);
        for part in &self.partitions {
            for packet in &part.packets {
                out.extend_from_slice(&packet.data);
            }
        }
        out
    }
}

/// Depacketizer: turns an unordered, lossy stream of RTP payloads back into
/// complete VP8 frames.
///
/// Sans-IO and single-threaded: the embedder pushes packets in arrival order
/// and drains reassembled frames. Frames that cannot complete are discarded
/// after a bounded window, never emitted partially, so memory stays bounded
/// under sustained loss and the downstream decoder sees frame loss as a
/// normal condition.
#[derive(Debug, Default)]
pub struct Unpacker {
    /// In-progress frames, ordered by the extended sequence number of their
    /// first packet, oldest first.
    frames: Vec<Frame>,
    output: VecDeque<Vec<u8>>,
    last_ts: Option<u32>,
    seq: ExtendedSeq,
    /// Highest extended sequence number of any emitted frame. Stragglers and
    /// duplicates at or below it are dropped on arrival.
    last_emitted: Option<u32>,
    frames_emitted: u64,
    frames_discarded: u64,
    last_discard: Option<ErrorCode>,
}

impl Unpacker {
    /// Capability descriptor for embedding in a filter graph.
    pub const INFO: FilterInfo = FilterInfo {
        name: "vp8 unpacker",
        inputs: 1,
        outputs: 1,
    };

    pub fn new() -> Self {
        Self::default()
    }

    /// Drain `input` in arrival order. Completed frames become available via
    /// [`Unpacker::pop_frame`].
    pub fn process(&mut self, input: &mut VecDeque<RtpPacket>) {
        while let Some(packet) = input.pop_front() {
            self.push(packet);
        }
    }

    /// Feed one arriving packet.
    pub fn push(&mut self, packet: RtpPacket) {
        let RtpPacket {
            payload,
            seq,
            timestamp,
            marker,
        } = packet;

        let (descriptor, data, mut error) = match PayloadDescriptor::parse(&payload, false) {
            Ok((d, consumed)) => (Some(d), payload[consumed..].to_vec(), ErrorCode::None),
            Err(e) => {
                trace!("Unparseable payload descriptor (seq {}): {}", seq, e);
                (None, Vec::new(), ErrorCode::InvalidPayloadDescriptor)
            }
        };

        let (extended_seq, placed) = match self.seq.next(seq) {
            Some(ext) => (ext, true),
            None => {
                // Over half the sequence space out of order. Unplaceable;
                // poison whatever frame claims this timestamp.
                error = ErrorCode::InvalidPayloadDescriptor;
                (0, false)
            }
        };

        // Stragglers are judged by sequence number alone; a corrupt
        // descriptor does not exempt a packet the emitted frames already
        // covered.
        if placed {
            if let Some(last) = self.last_emitted {
                if extended_seq <= last {
                    trace!("Drop at or before emitted: {} <= {}", extended_seq, last);
                    return;
                }
            }
        }

        if self.last_ts != Some(timestamp) {
            trace!("Timestamp boundary: {:?} -> {}", self.last_ts, timestamp);
            self.last_ts = Some(timestamp);
        }

        let packet = Packet {
            data,
            descriptor,
            extended_seq,
            error,
            last_of_frame: marker,
        };

        match self
            .frames
            .iter_mut()
            .rev()
            .find(|f| f.timestamp == timestamp && !f.is_terminal())
        {
            Some(frame) => {
                if frame.contains_seq(extended_seq) {
                    trace!("Drop exactly same packet: {}", extended_seq);
                    return;
                }
                frame.insert(packet);
            }
            None => {
                let frame = Frame::new(timestamp, packet);
                let pos = self
                    .frames
                    .iter()
                    .position(|f| f.min_seq() > extended_seq)
                    .unwrap_or(self.frames.len());
                self.frames.insert(pos, frame);
            }
        }

        self.poll_frames();
    }

    /// Take the next reassembled frame, in presentation order.
    pub fn pop_frame(&mut self) -> Option<Vec<u8>> {
        self.output.pop_front()
    }

    /// Frames emitted since construction.
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    /// Frames dropped since construction, for any reason.
    pub fn frames_discarded(&self) -> u64 {
        self.frames_discarded
    }

    /// Error state of the most recently discarded frame, for quality
    /// diagnostics. `Incomplete*` means loss aged the frame out; `Invalid*`
    /// means it was structurally irreconcilable.
    pub fn last_discard(&self) -> Option<ErrorCode> {
        self.last_discard
    }

    /// Frames currently held waiting for more packets.
    pub fn frames_pending(&self) -> usize {
        self.frames.len()
    }

    /// Re-judge all frames, discard the hopeless, emit the complete.
    fn poll_frames(&mut self) {
        // Structurally irreconcilable frames go immediately, wherever they
        // sit in the list.
        let mut i = 0;
        while i < self.frames.len() {
            let next_min = self.frames.get(i + 1).map(|f| f.min_seq());
            if let FrameStatus::Invalid(code) = self.frames[i].status(next_min) {
                let mut frame = self.frames.remove(i);
                frame.discarded = true;
                debug!("Discard frame ts={} error={:?}", frame.timestamp, code);
                self.frames_discarded += 1;
                self.last_discard = Some(code);
            } else {
                i += 1;
            }
        }

        // Emit from the head to preserve presentation order. An unfinished
        // head frame blocks emission until it completes or ages out.
        loop {
            let next_min = self.frames.get(1).map(|f| f.min_seq());
            let Some(head) = self.frames.first_mut() else {
                return;
            };

            match head.status(next_min) {
                FrameStatus::Complete => {
                    head.outputted = true;
                    let buf = head.assemble();
                    self.last_emitted = Some(head.max_seq());
                    trace!(
                        "Emit frame ts={} bytes={} partitions={}",
                        head.timestamp,
                        buf.len(),
                        head.partitions.len()
                    );
                    self.output.push_back(buf);
                    self.frames.remove(0);
                    self.frames_emitted += 1;
                }
                FrameStatus::Assembling => {
                    let newer = self.frames.len() - 1;
                    if newer >= MAX_FRAME_AGE {
                        let mut frame = self.frames.remove(0);
                        frame.discarded = true;
                        debug!(
                            "Discard aged frame ts={} error={:?} newer={}",
                            frame.timestamp, frame.error, newer
                        );
                        self.frames_discarded += 1;
                        self.last_discard = Some(frame.error);
                        continue;
                    }
                    return;
                }
                // The removal pass above already took invalid frames; a
                // late verdict here is handled the same way.
                FrameStatus::Invalid(code) => {
                    let mut frame = self.frames.remove(0);
                    frame.discarded = true;
                    debug!("Discard frame ts={} error={:?}", frame.timestamp, code);
                    self.frames_discarded += 1;
                    self.last_discard = Some(code);
                }
            }
        }
    }
}
