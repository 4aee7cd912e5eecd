//! SML transport layer: finds one escape-delimited frame in a byte stream,
//! undoes the escaping and checks the trailing CRC.

use std::str::FromStr;

use crc::{Crc, CRC_16_IBM_SDLC, CRC_16_KERMIT};

use crate::sml_decoder::DecodeError;

const ESCAPE: [u8; 4] = [0x1b; 4];
const VERSION_1: [u8; 4] = [0x01; 4];
const END_MARKER: u8 = 0x1a;

// CRC-16/IBM-SDLC is the X.25 checksum used by SML
const X25: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);
const KERMIT: Crc<u16> = Crc::<u16>::new(&CRC_16_KERMIT);

/// Checksum variant the meter uses for the transport frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrcMode {
    #[default]
    X25,
    Kermit,
    /// Accept frames without checking
    None,
}

impl CrcMode {
    pub fn checksum(&self, bytes: &[u8]) -> Option<u16> {
        match self {
            CrcMode::X25 => Some(X25.checksum(bytes)),
            CrcMode::Kermit => Some(KERMIT.checksum(bytes)),
            CrcMode::None => None,
        }
    }
}

impl FromStr for CrcMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x25" | "x-25" => Ok(CrcMode::X25),
            "kermit" => Ok(CrcMode::Kermit),
            "none" | "off" => Ok(CrcMode::None),
            other => Err(format!("unknown CRC mode `{other}`, expected x25, kermit or none")),
        }
    }
}

/// Extracts the un-escaped payload of the first complete frame in `buf`.
///
/// Escape sequences sit on 4-byte boundaries counted from the start sequence.
/// Returns [`DecodeError::IncompleteFrame`] when the buffer holds no start
/// sequence or ends before the end sequence.
pub fn extract_payload(buf: &[u8], crc: CrcMode) -> Result<Vec<u8>, DecodeError> {
    let mut start = find_start(buf).ok_or(DecodeError::IncompleteFrame)?;
    let mut payload = Vec::with_capacity(buf.len());
    let mut pos = start + 8;

    loop {
        let word = buf.get(pos..pos + 4).ok_or(DecodeError::IncompleteFrame)?;
        if word != ESCAPE {
            payload.extend_from_slice(word);
            pos += 4;
            continue;
        }

        let next = buf.get(pos + 4..pos + 8).ok_or(DecodeError::IncompleteFrame)?;
        if next == ESCAPE {
            // escaped literal 1b1b1b1b
            payload.extend_from_slice(&ESCAPE);
            pos += 8;
        } else if next == VERSION_1 {
            // a new frame started before the previous one ended
            start = pos;
            payload.clear();
            pos += 8;
        } else if next[0] == END_MARKER {
            let fill = usize::from(next[1]);
            verify_crc(&buf[start..pos + 6], [next[2], next[3]], crc)?;
            if fill > 3 || fill > payload.len() {
                return Err(DecodeError::Malformed(format!(
                    "invalid fill byte count {fill}"
                )));
            }
            payload.truncate(payload.len() - fill);
            return Ok(payload);
        } else {
            return Err(DecodeError::Malformed(format!(
                "unknown escape sequence {next:02x?}"
            )));
        }
    }
}

fn find_start(buf: &[u8]) -> Option<usize> {
    buf.windows(8)
        .position(|w| w[..4] == ESCAPE && w[4..] == VERSION_1)
}

fn verify_crc(covered: &[u8], wire: [u8; 2], crc: CrcMode) -> Result<(), DecodeError> {
    let Some(expected) = crc.checksum(covered) else {
        return Ok(());
    };
    let actual = u16::from_le_bytes(wire);
    if expected == actual {
        Ok(())
    } else {
        Err(DecodeError::CrcMismatch { expected, actual })
    }
}
