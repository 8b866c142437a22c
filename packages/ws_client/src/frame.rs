//! WebSocket frame codec (RFC 6455 §5).
//!
//! ```text
//! byte 0:  FIN(1) RSV(3) opcode(4)
//! byte 1:  MASK(1) len7(7)        126 → u16 follows, 127 → u64 follows
//!          [extended length, big-endian] [mask key (4)] payload
//! ```
//!
//! [`FrameDecoder`] is a resumable state machine: bytes can be fed in any
//! chunking and frames come out once they are complete. [`MessageAssembler`]
//! stitches fragmented data frames back into whole messages.

/// Largest possible frame header: 2 bytes + 8 byte length + 4 byte mask key.
pub const MAX_HEADER_LEN: usize = 14;

/// Control frames carry at most this many payload bytes.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Close status codes used by the client.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const NO_STATUS: u16 = 1005;
    pub const ABNORMAL: u16 = 1006;
    pub const INVALID_PAYLOAD: u16 = 1007;
    pub const MESSAGE_TOO_BIG: u16 = 1009;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("reserved bits set: {0:#04x}")]
    ReservedBits(u8),

    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),

    #[error("fragmented control frame")]
    FragmentedControl,

    #[error("control frame payload too long: {0} bytes")]
    ControlTooLong(usize),

    #[error("64-bit payload length has the most significant bit set")]
    LengthOverflow,

    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: u64, max: usize },

    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    #[error("new data frame while a fragmented message is in progress")]
    ExpectedContinuation,

    #[error("text message is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed close payload")]
    InvalidClosePayload,

    #[error("server sent a masked frame")]
    MaskedServerFrame,
}

impl FrameError {
    /// Close code to report to the peer when failing the connection.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::PayloadTooLarge { .. } => close_code::MESSAGE_TOO_BIG,
            Self::InvalidUtf8 => close_code::INVALID_PAYLOAD,
            _ => close_code::PROTOCOL_ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Parse the low nibble of the first header byte.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_control(self) -> bool {
        self.as_u8() & 0x8 != 0
    }
}

/// One WebSocket frame. Decoded frames hold the unmasked payload and keep
/// the mask key they arrived with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// A final, unmasked frame.
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Opcode::Text, text.into().into_bytes())
    }

    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Binary, data)
    }

    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Ping, data)
    }

    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Pong, data)
    }

    /// Close frame carrying `code` and `reason`. The reason is truncated so
    /// the payload stays within the control-frame limit; `NO_STATUS` is
    /// never put on the wire and yields an empty payload.
    pub fn close(code: u16, reason: &str) -> Self {
        Self::new(Opcode::Close, CloseFrame::new(code, reason).to_payload())
    }

    /// Continuation fragment of a message started by an earlier frame.
    pub fn continuation(data: impl Into<Vec<u8>>, fin: bool) -> Self {
        Self {
            fin,
            ..Self::new(Opcode::Continuation, data)
        }
    }

    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    pub fn with_mask(mut self, key: [u8; 4]) -> Self {
        self.mask = Some(key);
        self
    }

    /// Mask with a fresh random key, as required for client-to-server frames.
    pub fn with_random_mask(self) -> Self {
        self.with_mask(rand::random::<[u8; 4]>())
    }

    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Serialize header, mask key and (masked) payload into one buffer,
    /// using the smallest length encoding that fits.
    pub fn encode(&self) -> Vec<u8> {
        let len = self.payload.len();
        let mut out = Vec::with_capacity(MAX_HEADER_LEN + len);

        let fin_bit = if self.fin { 0x80 } else { 0x00 };
        out.push(fin_bit | self.opcode.as_u8());

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0x00 };
        match len {
            0..=125 => out.push(mask_bit | len as u8),
            126..=0xFFFF => {
                out.push(mask_bit | 126);
                out.extend_from_slice(&(len as u16).to_be_bytes());
            }
            _ => {
                out.push(mask_bit | 127);
                out.extend_from_slice(&(len as u64).to_be_bytes());
            }
        }

        match self.mask {
            Some(key) => {
                out.extend_from_slice(&key);
                let start = out.len();
                out.extend_from_slice(&self.payload);
                apply_mask(&mut out[start..], key);
            }
            None => out.extend_from_slice(&self.payload),
        }
        out
    }
}

/// XOR `data` in place with the 4-byte mask key. Masking is its own inverse.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// Parsed Close frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: u16, reason: &str) -> Self {
        Self {
            code,
            reason: reason.to_string(),
        }
    }

    /// Empty payloads mean "no status"; a lone byte is malformed.
    pub fn parse(payload: &[u8]) -> Result<Self, FrameError> {
        match payload {
            [] => Ok(Self::new(close_code::NO_STATUS, "")),
            [_] => Err(FrameError::InvalidClosePayload),
            [hi, lo, rest @ ..] => {
                let reason =
                    std::str::from_utf8(rest).map_err(|_| FrameError::InvalidClosePayload)?;
                Ok(Self::new(u16::from_be_bytes([*hi, *lo]), reason))
            }
        }
    }

    pub fn to_payload(&self) -> Vec<u8> {
        if self.code == close_code::NO_STATUS {
            return Vec::new();
        }
        let mut reason_len = self.reason.len().min(MAX_CONTROL_PAYLOAD - 2);
        while !self.reason.is_char_boundary(reason_len) {
            reason_len -= 1;
        }
        let mut payload = Vec::with_capacity(2 + reason_len);
        payload.extend_from_slice(&self.code.to_be_bytes());
        payload.extend_from_slice(&self.reason.as_bytes()[..reason_len]);
        payload
    }
}

#[derive(Debug, Clone, Copy)]
struct Header {
    fin: bool,
    opcode: Opcode,
    masked: bool,
}

#[derive(Debug, Clone, Copy)]
enum ReadState {
    Header,
    ExtendedLength {
        header: Header,
        width: usize,
    },
    MaskKey {
        header: Header,
        len: usize,
    },
    Payload {
        header: Header,
        len: usize,
        mask: Option<[u8; 4]>,
    },
}

/// Incremental frame decoder. After an error the decoder is in an
/// unspecified state and must be discarded together with the connection.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    pos: usize,
    state: ReadState,
    max_payload: usize,
}

impl FrameDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            state: ReadState::Header,
            max_payload,
        }
    }

    /// Append freshly received bytes.
    pub fn feed(&mut self, data: &[u8]) {
        if self.pos > 0 && (self.pos == self.buf.len() || self.pos >= 4096) {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(data);
    }

    /// Bytes received but not yet consumed by a complete frame step.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// True when part of a frame has been consumed and the rest is pending.
    pub fn is_mid_frame(&self) -> bool {
        !matches!(self.state, ReadState::Header)
    }

    /// Decode the next complete frame, or `Ok(None)` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        loop {
            match self.state {
                ReadState::Header => {
                    let Some([b0, b1]) = self.take_array::<2>() else {
                        return Ok(None);
                    };
                    let rsv = b0 & 0x70;
                    if rsv != 0 {
                        return Err(FrameError::ReservedBits(rsv));
                    }
                    let opcode = Opcode::from_u8(b0 & 0x0F)
                        .ok_or(FrameError::UnknownOpcode(b0 & 0x0F))?;
                    let header = Header {
                        fin: b0 & 0x80 != 0,
                        opcode,
                        masked: b1 & 0x80 != 0,
                    };
                    if opcode.is_control() && !header.fin {
                        return Err(FrameError::FragmentedControl);
                    }
                    self.state = match b1 & 0x7F {
                        126 => ReadState::ExtendedLength { header, width: 2 },
                        127 => ReadState::ExtendedLength { header, width: 8 },
                        len7 => self.after_length(header, u64::from(len7))?,
                    };
                }
                ReadState::ExtendedLength { header, width } => {
                    let len = if width == 2 {
                        let Some(bytes) = self.take_array::<2>() else {
                            return Ok(None);
                        };
                        u64::from(u16::from_be_bytes(bytes))
                    } else {
                        let Some(bytes) = self.take_array::<8>() else {
                            return Ok(None);
                        };
                        let len = u64::from_be_bytes(bytes);
                        if len & (1 << 63) != 0 {
                            return Err(FrameError::LengthOverflow);
                        }
                        len
                    };
                    self.state = self.after_length(header, len)?;
                }
                ReadState::MaskKey { header, len } => {
                    let Some(key) = self.take_array::<4>() else {
                        return Ok(None);
                    };
                    self.state = ReadState::Payload {
                        header,
                        len,
                        mask: Some(key),
                    };
                }
                ReadState::Payload { header, len, mask } => {
                    if self.buffered() < len {
                        return Ok(None);
                    }
                    let mut payload = self.buf[self.pos..self.pos + len].to_vec();
                    self.pos += len;
                    if let Some(key) = mask {
                        apply_mask(&mut payload, key);
                    }
                    self.state = ReadState::Header;
                    return Ok(Some(Frame {
                        fin: header.fin,
                        opcode: header.opcode,
                        mask,
                        payload,
                    }));
                }
            }
        }
    }

    fn after_length(&self, header: Header, len: u64) -> Result<ReadState, FrameError> {
        if header.opcode.is_control() && len > MAX_CONTROL_PAYLOAD as u64 {
            return Err(FrameError::ControlTooLong(len as usize));
        }
        let len = usize::try_from(len)
            .ok()
            .filter(|len| *len <= self.max_payload)
            .ok_or(FrameError::PayloadTooLarge {
                len,
                max: self.max_payload,
            })?;
        Ok(if header.masked {
            ReadState::MaskKey { header, len }
        } else {
            ReadState::Payload {
                header,
                len,
                mask: None,
            }
        })
    }

    fn take_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        if self.buffered() < N {
            return None;
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        Some(out)
    }
}

/// A complete inbound unit after reassembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(CloseFrame),
}

/// Reassembles fragmented Text/Binary messages. Control frames may arrive
/// between fragments and are passed straight through.
#[derive(Debug)]
pub struct MessageAssembler {
    partial: Option<(Opcode, Vec<u8>)>,
    max_message_size: usize,
}

impl MessageAssembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            partial: None,
            max_message_size,
        }
    }

    pub fn push(&mut self, frame: Frame) -> Result<Option<Incoming>, FrameError> {
        match frame.opcode {
            Opcode::Ping => Ok(Some(Incoming::Ping(frame.payload))),
            Opcode::Pong => Ok(Some(Incoming::Pong(frame.payload))),
            Opcode::Close => CloseFrame::parse(&frame.payload).map(|c| Some(Incoming::Close(c))),
            Opcode::Text | Opcode::Binary => {
                if self.partial.is_some() {
                    return Err(FrameError::ExpectedContinuation);
                }
                if frame.fin {
                    finish(frame.opcode, frame.payload).map(Some)
                } else {
                    self.partial = Some((frame.opcode, frame.payload));
                    Ok(None)
                }
            }
            Opcode::Continuation => {
                let Some((_, data)) = self.partial.as_mut() else {
                    return Err(FrameError::UnexpectedContinuation);
                };
                let total = data.len() + frame.payload.len();
                if total > self.max_message_size {
                    return Err(FrameError::PayloadTooLarge {
                        len: total as u64,
                        max: self.max_message_size,
                    });
                }
                data.extend_from_slice(&frame.payload);
                if !frame.fin {
                    return Ok(None);
                }
                match self.partial.take() {
                    Some((opcode, data)) => finish(opcode, data).map(Some),
                    None => Err(FrameError::UnexpectedContinuation),
                }
            }
        }
    }
}

fn finish(opcode: Opcode, data: Vec<u8>) -> Result<Incoming, FrameError> {
    match opcode {
        Opcode::Text => String::from_utf8(data)
            .map(Incoming::Text)
            .map_err(|_| FrameError::InvalidUtf8),
        _ => Ok(Incoming::Binary(data)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const LIMIT: usize = 16 * 1024 * 1024;

    fn decode_all(bytes: &[u8]) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new(LIMIT);
        decoder.feed(bytes);
        let mut frames = Vec::new();
        while let Some(frame) = decoder.next_frame().unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn length_tiers_pick_smallest_encoding() {
        let cases = [
            (0usize, 2usize),
            (125, 2),
            (126, 4),
            (0xFFFF, 4),
            (0x1_0000, 10),
        ];
        for (len, header_len) in cases {
            let encoded = Frame::binary(vec![7u8; len]).encode();
            assert_eq!(encoded.len(), header_len + len, "payload length {len}");
        }

        let encoded = Frame::binary(vec![0u8; 126]).encode();
        assert_eq!(encoded[1], 126);
        assert_eq!(&encoded[2..4], &[0x00, 0x7E]);

        let encoded = Frame::binary(vec![0u8; 0x1_0000]).encode();
        assert_eq!(encoded[1], 127);
        assert_eq!(&encoded[2..10], &[0, 0, 0, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn masked_text_frame_layout() {
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let encoded = Frame::text("Hello").with_mask(key).encode();
        // RFC 6455 §5.7 example: masked "Hello".
        assert_eq!(
            encoded,
            vec![
                0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58
            ]
        );
    }

    #[test]
    fn random_mask_sets_mask_bit() {
        let encoded = Frame::text("x").with_random_mask().encode();
        assert_eq!(encoded[1] & 0x80, 0x80);
        assert_eq!(encoded.len(), 2 + 4 + 1);
    }

    #[test]
    fn decodes_unmasked_and_masked_frames() {
        let mut bytes = Frame::text("one").encode();
        bytes.extend(Frame::text("two").with_mask([1, 2, 3, 4]).encode());
        let frames = decode_all(&bytes);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload, b"one");
        assert!(!frames[0].is_masked());
        assert_eq!(frames[1].payload, b"two");
        assert_eq!(frames[1].mask, Some([1, 2, 3, 4]));
    }

    #[test]
    fn resumes_across_byte_by_byte_feeds() {
        let payload = vec![b'a'; 300];
        let bytes = Frame::text(String::from_utf8(payload.clone()).unwrap()).encode();
        let mut decoder = FrameDecoder::new(LIMIT);
        let mut got = None;
        for (i, byte) in bytes.iter().enumerate() {
            decoder.feed(std::slice::from_ref(byte));
            if let Some(frame) = decoder.next_frame().unwrap() {
                assert_eq!(i, bytes.len() - 1, "frame completed early");
                got = Some(frame);
            }
        }
        assert_eq!(got.unwrap().payload, payload);
        assert!(!decoder.is_mid_frame());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn decodes_64_bit_length() {
        let payload = vec![9u8; 70_000];
        let frames = decode_all(&Frame::binary(payload.clone()).encode());
        assert_eq!(frames[0].payload, payload);
    }

    #[test]
    fn rejects_reserved_bits() {
        let mut decoder = FrameDecoder::new(LIMIT);
        decoder.feed(&[0xC1, 0x00]);
        assert_eq!(decoder.next_frame(), Err(FrameError::ReservedBits(0x40)));
    }

    #[test]
    fn rejects_unknown_opcode() {
        let mut decoder = FrameDecoder::new(LIMIT);
        decoder.feed(&[0x83, 0x00]);
        assert_eq!(decoder.next_frame(), Err(FrameError::UnknownOpcode(0x3)));
    }

    #[test]
    fn rejects_oversized_control_frames() {
        let mut decoder = FrameDecoder::new(LIMIT);
        decoder.feed(&[0x89, 126, 0x00, 0x80]);
        assert_eq!(decoder.next_frame(), Err(FrameError::ControlTooLong(126)));

        let mut decoder = FrameDecoder::new(LIMIT);
        decoder.feed(&[0x09, 0x00]);
        assert_eq!(decoder.next_frame(), Err(FrameError::FragmentedControl));
    }

    #[test]
    fn rejects_length_with_top_bit() {
        let mut decoder = FrameDecoder::new(LIMIT);
        decoder.feed(&[0x82, 127, 0x80, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(decoder.next_frame(), Err(FrameError::LengthOverflow));
    }

    #[test]
    fn enforces_payload_limit() {
        let mut decoder = FrameDecoder::new(100);
        decoder.feed(&Frame::binary(vec![0u8; 101]).encode());
        assert_eq!(
            decoder.next_frame(),
            Err(FrameError::PayloadTooLarge { len: 101, max: 100 })
        );
    }

    #[test]
    fn close_payload_roundtrip() {
        let frame = Frame::close(close_code::GOING_AWAY, "bye");
        assert_eq!(
            CloseFrame::parse(&frame.payload).unwrap(),
            CloseFrame::new(close_code::GOING_AWAY, "bye")
        );
        assert_eq!(
            CloseFrame::parse(&[]).unwrap().code,
            close_code::NO_STATUS
        );
        assert_eq!(
            CloseFrame::parse(&[0x03]),
            Err(FrameError::InvalidClosePayload)
        );
        assert!(Frame::close(close_code::NO_STATUS, "ignored").payload.is_empty());
    }

    #[test]
    fn close_reason_is_truncated_on_char_boundary() {
        let reason = "é".repeat(100);
        let payload = CloseFrame::new(close_code::NORMAL, &reason).to_payload();
        assert!(payload.len() <= MAX_CONTROL_PAYLOAD);
        assert!(CloseFrame::parse(&payload).is_ok());
    }

    #[test]
    fn assembles_fragmented_text_with_interleaved_ping() {
        let mut assembler = MessageAssembler::new(LIMIT);
        assert_eq!(
            assembler
                .push(Frame::text("Hel").with_fin(false))
                .unwrap(),
            None
        );
        assert_eq!(
            assembler.push(Frame::ping(b"p".to_vec())).unwrap(),
            Some(Incoming::Ping(b"p".to_vec()))
        );
        assert_eq!(
            assembler
                .push(Frame::continuation(b"lo".to_vec(), true))
                .unwrap(),
            Some(Incoming::Text("Hello".into()))
        );
    }

    #[test]
    fn assembler_rejects_bad_sequences() {
        let mut assembler = MessageAssembler::new(LIMIT);
        assert_eq!(
            assembler.push(Frame::continuation(b"x".to_vec(), true)),
            Err(FrameError::UnexpectedContinuation)
        );

        let mut assembler = MessageAssembler::new(LIMIT);
        assembler.push(Frame::text("a").with_fin(false)).unwrap();
        assert_eq!(
            assembler.push(Frame::text("b")),
            Err(FrameError::ExpectedContinuation)
        );

        let mut assembler = MessageAssembler::new(LIMIT);
        assert_eq!(
            assembler.push(Frame::new(Opcode::Text, vec![0xff, 0xfe])),
            Err(FrameError::InvalidUtf8)
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn any_split_decodes_the_same_frame(
            payload in proptest::collection::vec(any::<u8>(), 0..1024),
            mask in proptest::option::of(any::<[u8; 4]>()),
            split in any::<prop::sample::Index>(),
        ) {
            let mut frame = Frame::binary(payload);
            frame.mask = mask;
            let bytes = frame.encode();
            let at = split.index(bytes.len() + 1);

            let mut decoder = FrameDecoder::new(LIMIT);
            decoder.feed(&bytes[..at]);
            let early = decoder.next_frame().unwrap();
            let decoded = match early {
                Some(decoded) => {
                    prop_assert_eq!(at, bytes.len());
                    decoded
                }
                None => {
                    decoder.feed(&bytes[at..]);
                    decoder.next_frame().unwrap().unwrap()
                }
            };
            prop_assert_eq!(decoded, frame);
        }
    }
}
