use tracing::debug;

use crate::register::{Register, Unit};
use crate::sml_frame::{self, CrcMode};

/// `GetList.Res` message body tag, the one carrying the meter readings
const GET_LIST_RESPONSE: u64 = 0x0701;

const TYPE_OCTET_STRING: u8 = 0x0;
const TYPE_BOOLEAN: u8 = 0x4;
const TYPE_SIGNED: u8 = 0x5;
const TYPE_UNSIGNED: u8 = 0x6;
const TYPE_LIST: u8 = 0x7;
// Real messages nest about six lists deep
const MAX_NESTING: usize = 16;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("no complete SML frame in response")]
    IncompleteFrame,
    #[error("frame CRC mismatch: computed {expected:#06x}, frame carries {actual:#06x}")]
    CrcMismatch { expected: u16, actual: u16 },
    #[error("malformed SML data: {0}")]
    Malformed(String),
    #[error("frame contains no GetList response")]
    NoValueList,
}

/// Decodes the raw response body of one poll into registers.
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<Register>, DecodeError>;
}

/// Decoder for SML 1.x frames as served by meter gateways.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmlDecoder {
    crc: CrcMode,
}

impl SmlDecoder {
    pub fn new(crc: CrcMode) -> Self {
        Self { crc }
    }
}

impl FrameDecoder for SmlDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<Register>, DecodeError> {
        let payload = sml_frame::extract_payload(bytes, self.crc)?;
        let messages = parse_messages(&payload)?;

        let entries = messages
            .iter()
            .find_map(get_list_entries)
            .ok_or(DecodeError::NoValueList)?;

        Ok(entries.iter().filter_map(register_from_entry).collect())
    }
}

/// One decoded SML TLV element.
#[derive(Debug, Clone, PartialEq)]
enum SmlValue {
    Absent,
    Bytes(Vec<u8>),
    Bool(bool),
    Signed(i64),
    Unsigned(u64),
    List(Vec<SmlValue>),
}

impl SmlValue {
    fn as_list(&self) -> Option<&[SmlValue]> {
        match self {
            SmlValue::List(items) => Some(items),
            _ => None,
        }
    }

    fn as_u64(&self) -> Option<u64> {
        match self {
            SmlValue::Unsigned(v) => Some(*v),
            SmlValue::Signed(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            SmlValue::Signed(v) => Some(*v),
            SmlValue::Unsigned(v) => i64::try_from(*v).ok(),
            SmlValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn next_byte(&mut self) -> Result<u8, DecodeError> {
        let byte = self.peek().ok_or_else(|| truncated(self.pos))?;
        self.pos += 1;
        Ok(byte)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + len)
            .ok_or_else(|| truncated(self.pos))?;
        self.pos += len;
        Ok(bytes)
    }

    /// Reads a type-length field: `(type, length, bytes used by the TL field)`.
    fn read_type_length(&mut self) -> Result<(u8, usize, usize), DecodeError> {
        let first = self.next_byte()?;
        let kind = (first >> 4) & 0x07;
        let mut len = usize::from(first & 0x0f);
        let mut tl_len = 1;
        let mut more = first & 0x80 != 0;

        while more {
            let byte = self.next_byte()?;
            tl_len += 1;
            if tl_len > 4 {
                return Err(DecodeError::Malformed(format!(
                    "type-length field too long at offset {}",
                    self.pos
                )));
            }
            len = (len << 4) | usize::from(byte & 0x0f);
            more = byte & 0x80 != 0;
        }

        Ok((kind, len, tl_len))
    }

    fn read_value(&mut self, depth: usize) -> Result<SmlValue, DecodeError> {
        let offset = self.pos;
        let (kind, len, tl_len) = self.read_type_length()?;

        if kind == TYPE_LIST {
            if depth >= MAX_NESTING {
                return Err(DecodeError::Malformed(format!(
                    "lists nested deeper than {MAX_NESTING} at offset {offset}"
                )));
            }
            let mut items = Vec::with_capacity(len.min(64));
            for _ in 0..len {
                items.push(self.read_value(depth + 1)?);
            }
            return Ok(SmlValue::List(items));
        }

        // For scalars the length counts the TL bytes too. 0x00 (end of message)
        // and 0x01 (optional field not set) both carry no data.
        let data_len = len.saturating_sub(tl_len);
        let data = self.take(data_len)?;
        if data.is_empty() {
            return Ok(SmlValue::Absent);
        }

        match kind {
            TYPE_OCTET_STRING => Ok(SmlValue::Bytes(data.to_vec())),
            TYPE_BOOLEAN => Ok(SmlValue::Bool(data.iter().any(|b| *b != 0))),
            TYPE_SIGNED => Ok(SmlValue::Signed(decode_signed(data, offset)?)),
            TYPE_UNSIGNED => Ok(SmlValue::Unsigned(decode_unsigned(data, offset)?)),
            other => Err(DecodeError::Malformed(format!(
                "unknown type {other:#x} at offset {offset}"
            ))),
        }
    }
}

fn truncated(offset: usize) -> DecodeError {
    DecodeError::Malformed(format!("data ends unexpectedly at offset {offset}"))
}

fn decode_unsigned(data: &[u8], offset: usize) -> Result<u64, DecodeError> {
    if data.len() > 8 {
        return Err(DecodeError::Malformed(format!(
            "{}-byte integer at offset {offset}",
            data.len()
        )));
    }
    Ok(data.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

fn decode_signed(data: &[u8], offset: usize) -> Result<i64, DecodeError> {
    let unsigned = decode_unsigned(data, offset)?;
    let bits = data.len() as u32 * 8;
    if bits == 64 {
        return Ok(unsigned as i64);
    }
    // sign-extend from the encoded width
    let shift = 64 - bits;
    Ok(((unsigned << shift) as i64) >> shift)
}

fn parse_messages(payload: &[u8]) -> Result<Vec<SmlValue>, DecodeError> {
    let mut cursor = Cursor::new(payload);
    let mut messages = Vec::new();

    while cursor.remaining() > 0 {
        // stray end-of-message / padding bytes between messages
        if cursor.peek() == Some(0x00) {
            cursor.pos += 1;
            continue;
        }
        messages.push(cursor.read_value(0)?);
    }

    Ok(messages)
}

/// `SML_Message` = [transactionId, groupNo, abortOnError, body, crc, end];
/// body = [tag, content]; GetList.Res content has the value list at index 4.
fn get_list_entries(message: &SmlValue) -> Option<&[SmlValue]> {
    let body = message.as_list()?.get(3)?.as_list()?;
    if body.first()?.as_u64()? != GET_LIST_RESPONSE {
        return None;
    }
    body.get(1)?.as_list()?.get(4)?.as_list()
}

/// List entry = [objName, status, valTime, unit, scaler, value, signature].
fn register_from_entry(entry: &SmlValue) -> Option<Register> {
    let fields = entry.as_list()?;
    let code = match fields.first()? {
        SmlValue::Bytes(obis) if obis.len() == 6 => format!("{}.{}.{}", obis[2], obis[3], obis[4]),
        other => {
            debug!(?other, "skipping list entry without OBIS name");
            return None;
        }
    };

    let Some(raw_value) = fields.get(5).and_then(SmlValue::as_i64) else {
        debug!(code = %code, "skipping non-numeric list entry");
        return None;
    };

    let scale_exponent = fields
        .get(4)
        .and_then(SmlValue::as_i64)
        .and_then(|scaler| i8::try_from(scaler).ok())
        .unwrap_or(0);
    let unit = fields
        .get(3)
        .and_then(SmlValue::as_u64)
        .and_then(|code| u8::try_from(code).ok())
        .map(Unit);

    Some(Register {
        code,
        raw_value,
        scale_exponent,
        unit,
        sample_time: fields.get(2).and_then(sml_time),
    })
}

/// `SML_Time` is a choice: `[1, secIndex]`, `[2, timestamp]` or
/// `[3, [timestamp, localOffset, seasonOffset]]`. Some meters send the bare
/// number instead.
fn sml_time(value: &SmlValue) -> Option<i64> {
    match value {
        SmlValue::List(choice) => match choice.get(1)? {
            SmlValue::List(local) => local.first()?.as_i64(),
            time => time.as_i64(),
        },
        SmlValue::Absent | SmlValue::Bytes(_) => None,
        scalar => scalar.as_i64(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sml_frame::tests::build_frame;

    // Minimal TLV encoder for building test frames

    pub(crate) fn octets(bytes: &[u8]) -> Vec<u8> {
        let mut out = vec![(bytes.len() + 1) as u8];
        out.extend_from_slice(bytes);
        out
    }

    pub(crate) fn unsigned(value: u64, width: usize) -> Vec<u8> {
        let mut out = vec![0x60 | (width + 1) as u8];
        out.extend_from_slice(&value.to_be_bytes()[8 - width..]);
        out
    }

    pub(crate) fn signed(value: i64, width: usize) -> Vec<u8> {
        let mut out = vec![0x50 | (width + 1) as u8];
        out.extend_from_slice(&value.to_be_bytes()[8 - width..]);
        out
    }

    pub(crate) fn list(items: &[Vec<u8>]) -> Vec<u8> {
        let mut out = vec![0x70 | items.len() as u8];
        for item in items {
            out.extend_from_slice(item);
        }
        out
    }

    pub(crate) const ABSENT: u8 = 0x01;

    pub(crate) fn entry(
        obis: [u8; 6],
        time: Option<u32>,
        unit: Option<u8>,
        scaler: i8,
        value: i64,
    ) -> Vec<u8> {
        list(&[
            octets(&obis),
            vec![ABSENT],
            time.map(|t| list(&[unsigned(1, 1), unsigned(u64::from(t), 4)]))
                .unwrap_or_else(|| vec![ABSENT]),
            unit.map(|u| unsigned(u64::from(u), 1))
                .unwrap_or_else(|| vec![ABSENT]),
            signed(i64::from(scaler), 1),
            signed(value, 8),
            vec![ABSENT],
        ])
    }

    fn message(tag: u64, content: Vec<u8>) -> Vec<u8> {
        let mut out = list(&[
            octets(&[0x01, 0x02]),
            unsigned(0, 1),
            unsigned(0, 1),
            list(&[unsigned(tag, 2), content]),
            unsigned(0x1234, 2),
        ]);
        // the 6th list element: end of message
        out[0] += 1;
        out.push(0x00);
        out
    }

    /// Open response, GetList response carrying `entries`, close response.
    pub(crate) fn sml_payload(entries: &[Vec<u8>]) -> Vec<u8> {
        let mut payload = message(0x0101, list(&vec![vec![ABSENT]; 6]));
        payload.extend(message(
            GET_LIST_RESPONSE,
            list(&[
                vec![ABSENT],
                octets(&[0x0a, 0x01, 0x45, 0x4d, 0x48]),
                vec![ABSENT],
                vec![ABSENT],
                list(entries),
                vec![ABSENT],
                vec![ABSENT],
            ]),
        ));
        payload.extend(message(0x0201, list(&[vec![ABSENT]])));
        payload
    }

    fn decode(entries: &[Vec<u8>]) -> Result<Vec<Register>, DecodeError> {
        let frame = build_frame(&sml_payload(entries), CrcMode::X25);
        SmlDecoder::default().decode(&frame)
    }

    #[test]
    fn test_decode_meter_frame() {
        let registers = decode(&[
            entry([1, 0, 1, 8, 0, 255], Some(100), Some(30), -1, 1000),
            entry([1, 0, 1, 8, 1, 255], Some(100), Some(27), 0, 50),
        ])
        .unwrap();

        assert_eq!(
            registers,
            vec![
                Register::new("1.8.0", 1000, -1)
                    .with_unit(Unit::WATT_HOUR)
                    .with_sample_time(100),
                Register::new("1.8.1", 50, 0)
                    .with_unit(Unit::WATT)
                    .with_sample_time(100),
            ]
        );
    }

    #[test]
    fn test_decode_register_without_unit_or_time() {
        let registers = decode(&[entry([1, 0, 96, 5, 0, 255], None, None, 0, 0x0182)]).unwrap();

        assert_eq!(registers, vec![Register::new("96.5.0", 0x0182, 0)]);
    }

    #[test]
    fn test_decode_skips_octet_string_values() {
        let server_id = list(&[
            octets(&[1, 0, 0, 0, 9, 255]),
            vec![ABSENT],
            vec![ABSENT],
            vec![ABSENT],
            vec![ABSENT],
            octets(&[0x0a, 0x01, 0x45, 0x4d, 0x48]),
            vec![ABSENT],
        ]);
        let registers = decode(&[
            server_id,
            entry([1, 0, 16, 7, 0, 255], None, Some(27), 0, -230),
        ])
        .unwrap();

        assert_eq!(registers.len(), 1);
        assert_eq!(registers[0].code, "16.7.0");
        assert_eq!(registers[0].raw_value, -230);
    }

    #[test]
    fn test_decode_without_get_list_response() {
        let payload = message(0x0101, list(&vec![vec![ABSENT]; 6]));
        let frame = build_frame(&payload, CrcMode::X25);

        assert_eq!(
            SmlDecoder::default().decode(&frame),
            Err(DecodeError::NoValueList)
        );
    }

    #[test]
    fn test_decode_truncated_message() {
        let mut payload = sml_payload(&[entry([1, 0, 1, 8, 0, 255], Some(1), Some(30), 0, 1)]);
        payload.truncate(payload.len() / 2);
        let frame = build_frame(&payload, CrcMode::X25);

        assert!(matches!(
            SmlDecoder::default().decode(&frame),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_deeply_nested_lists() {
        // Every 0x71 opens another one-element list
        let frame = build_frame(&vec![0x71u8; 100_000], CrcMode::None);

        assert!(matches!(
            SmlDecoder::new(CrcMode::None).decode(&frame),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_nesting_limit() {
        let mut nested = unsigned(7, 1);
        for _ in 0..MAX_NESTING {
            nested = list(&[nested]);
        }
        assert!(matches!(Cursor::new(&nested).read_value(0), Ok(SmlValue::List(_))));

        let too_deep = list(&[nested]);
        assert!(matches!(
            Cursor::new(&too_deep).read_value(0),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_incomplete_frame() {
        let frame = build_frame(&sml_payload(&[]), CrcMode::X25);
        assert_eq!(
            SmlDecoder::default().decode(&frame[..20]),
            Err(DecodeError::IncompleteFrame)
        );
    }

    #[test]
    fn test_signed_integer_widths() {
        assert_eq!(decode_signed(&[0xff], 0), Ok(-1));
        assert_eq!(decode_signed(&[0xff, 0x38], 0), Ok(-200));
        assert_eq!(decode_signed(&[0x00, 0xc8], 0), Ok(200));
        assert_eq!(decode_signed(&[0x80, 0, 0, 0, 0, 0, 0, 0], 0), Ok(i64::MIN));
        assert_eq!(decode_unsigned(&[0x01, 0x00], 0), Ok(256));
        assert!(decode_unsigned(&[0; 9], 0).is_err());
    }

    #[test]
    fn test_multi_byte_type_length() {
        // 0x81 0x03: octet string, length 0x13 including both TL bytes
        let mut bytes = vec![0x81, 0x03];
        bytes.extend_from_slice(&[0xaa; 17]);
        let mut cursor = Cursor::new(&bytes);

        assert_eq!(cursor.read_value(0), Ok(SmlValue::Bytes(vec![0xaa; 17])));
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_sml_time_variants() {
        assert_eq!(
            sml_time(&SmlValue::List(vec![
                SmlValue::Unsigned(1),
                SmlValue::Unsigned(42)
            ])),
            Some(42)
        );
        assert_eq!(
            sml_time(&SmlValue::List(vec![
                SmlValue::Unsigned(3),
                SmlValue::List(vec![
                    SmlValue::Unsigned(1_700_000_000),
                    SmlValue::Signed(60),
                    SmlValue::Signed(0)
                ])
            ])),
            Some(1_700_000_000)
        );
        assert_eq!(sml_time(&SmlValue::Unsigned(7)), Some(7));
        assert_eq!(sml_time(&SmlValue::Absent), None);
    }
}
