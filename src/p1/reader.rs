use super::error::ParseError;
use crc::{Crc, CRC_16_ARC};

/// Largest frame (header through `!`) the reader will buffer.
pub const MAX_TELEGRAM_LEN: usize = 2048;

const P1_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    WaitingForStart,
    InFrame,
    Checksum { digits: u8, value: u16 },
}

/// Incremental P1 frame reader.
///
/// Bytes are pushed one at a time; a frame runs from `/` to `!` and is
/// followed by four hex digits holding the CRC-16/ARC of everything from
/// `/` up to and including `!`. Anything between frames is skipped.
pub struct P1Reader {
    buffer: heapless::Vec<u8, MAX_TELEGRAM_LEN>,
    state: ReadState,
}

impl Default for P1Reader {
    fn default() -> Self {
        Self::new()
    }
}

impl P1Reader {
    pub fn new() -> Self {
        Self {
            buffer: heapless::Vec::new(),
            state: ReadState::WaitingForStart,
        }
    }

    /// True while a frame has been started but not yet completed.
    pub fn in_frame(&self) -> bool {
        self.state != ReadState::WaitingForStart
    }

    /// Drops any partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = ReadState::WaitingForStart;
    }

    /// Feeds one byte; returns the frame text (`/` through `!`) once its
    /// checksum has been verified, or the reason it was rejected.
    pub fn feed(&mut self, byte: u8) -> Option<Result<String, ParseError>> {
        match self.state {
            ReadState::WaitingForStart => {
                if byte == b'/' {
                    self.start_frame();
                }
                None
            }
            ReadState::InFrame => {
                if byte == b'/' {
                    // A new header restarts the frame
                    self.start_frame();
                    return None;
                }
                if self.buffer.push(byte).is_err() {
                    self.reset();
                    return Some(Err(ParseError::FrameTooLong {
                        max: MAX_TELEGRAM_LEN,
                    }));
                }
                if byte == b'!' {
                    self.state = ReadState::Checksum { digits: 0, value: 0 };
                }
                None
            }
            ReadState::Checksum { digits, value } => {
                let Some(nibble) = (byte as char).to_digit(16) else {
                    self.reset();
                    return Some(Err(ParseError::InvalidCrc));
                };
                let value = (value << 4) | nibble as u16;
                if digits + 1 < 4 {
                    self.state = ReadState::Checksum {
                        digits: digits + 1,
                        value,
                    };
                    return None;
                }
                Some(self.finish_frame(value))
            }
        }
    }

    fn start_frame(&mut self) {
        self.buffer.clear();
        // Capacity is far above one byte
        let _ = self.buffer.push(b'/');
        self.state = ReadState::InFrame;
    }

    fn finish_frame(&mut self, expected: u16) -> Result<String, ParseError> {
        let computed = P1_CRC.checksum(&self.buffer);
        let result = if computed == expected {
            Ok(String::from_utf8_lossy(&self.buffer).into_owned())
        } else {
            Err(ParseError::CrcMismatch { expected, computed })
        };
        self.reset();
        result
    }
}

/// CRC-16/ARC of a frame body, as written after the `!`.
pub fn frame_crc(frame: &[u8]) -> u16 {
    P1_CRC.checksum(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(reader: &mut P1Reader, bytes: &[u8]) -> Vec<Result<String, ParseError>> {
        bytes.iter().filter_map(|&b| reader.feed(b)).collect()
    }

    fn framed(body: &str) -> String {
        format!("{body}{:04X}\r\n", frame_crc(body.as_bytes()))
    }

    #[test]
    fn crc_matches_arc_check_value() {
        assert_eq!(frame_crc(b"123456789"), 0xBB3D);
    }

    #[test]
    fn valid_frame_is_returned_once() {
        let body = "/ISK5\\2M550T-1012\r\n\r\n1-0:1.8.1(000404.243*kWh)\r\n!";
        let mut reader = P1Reader::new();

        let frames = feed_all(&mut reader, framed(body).as_bytes());

        assert_eq!(frames, vec![Ok(body.to_string())]);
        assert!(!reader.in_frame());
    }

    #[test]
    fn garbage_between_frames_is_skipped() {
        let body = "/X\r\n\r\n0-0:96.14.0(0001)\r\n!";
        let stream = format!("noise\r\n{}trailing{}", framed(body), framed(body));
        let mut reader = P1Reader::new();

        let frames = feed_all(&mut reader, stream.as_bytes());

        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.as_deref() == Ok(body)));
    }

    #[test]
    fn corrupted_byte_fails_checksum() {
        let body = "/X\r\n\r\n1-0:1.7.0(00.191*kW)\r\n!";
        let mut wire = framed(body).into_bytes();
        wire[12] = b'9';
        let mut reader = P1Reader::new();

        let frames = feed_all(&mut reader, &wire);

        assert!(matches!(frames.as_slice(), [Err(ParseError::CrcMismatch { .. })]));
    }

    #[test]
    fn non_hex_checksum_is_rejected() {
        let mut reader = P1Reader::new();
        let frames = feed_all(&mut reader, b"/X\r\n!12G4");
        assert_eq!(frames, vec![Err(ParseError::InvalidCrc)]);
    }

    #[test]
    fn overlong_frame_is_dropped_and_reader_recovers() {
        let mut reader = P1Reader::new();
        let mut stream = vec![b'/'];
        stream.extend(std::iter::repeat(b'a').take(MAX_TELEGRAM_LEN));
        let frames = feed_all(&mut reader, &stream);
        assert_eq!(
            frames,
            vec![Err(ParseError::FrameTooLong {
                max: MAX_TELEGRAM_LEN
            })]
        );

        let body = "/Y\r\n!";
        let frames = feed_all(&mut reader, framed(body).as_bytes());
        assert_eq!(frames, vec![Ok(body.to_string())]);
    }

    #[test]
    fn new_header_restarts_partial_frame() {
        let body = "/B\r\n!";
        let stream = format!("/A\r\n1-0:1.8.1(0{}", framed(body));
        let mut reader = P1Reader::new();

        let frames = feed_all(&mut reader, stream.as_bytes());

        assert_eq!(frames, vec![Ok(body.to_string())]);
    }
}
