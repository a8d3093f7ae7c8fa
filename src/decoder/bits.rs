//! Armored payload bit access.
//!
//! AIS payloads carry six bits per character. Fields sit at fixed bit
//! offsets, most significant bit first.

use crate::errors::DecodeError;

/// Unpacked payload, one six-bit symbol per byte
pub(crate) struct Payload {
    symbols: Vec<u8>,
    bit_len: usize,
}

impl Payload {
    /// Unarmor `armored`, dropping `fill_bits` from the end.
    pub(crate) fn from_armored(armored: &str, fill_bits: u8) -> Result<Self, DecodeError> {
        let symbols = armored
            .bytes()
            .map(unarmor)
            .collect::<Result<Vec<u8>, DecodeError>>()?;
        let bit_len = (symbols.len() * 6).saturating_sub(fill_bits as usize);
        Ok(Self { symbols, bit_len })
    }

    pub(crate) fn bit_len(&self) -> usize {
        self.bit_len
    }

    fn bit(&self, index: usize) -> u64 {
        let symbol = self.symbols[index / 6];
        ((symbol >> (5 - index % 6)) & 1) as u64
    }

    /// Unsigned field, None if it extends past the payload
    pub(crate) fn uint(&self, start: usize, len: usize) -> Option<u64> {
        if start + len > self.bit_len {
            return None;
        }
        Some((start..start + len).fold(0u64, |acc, i| (acc << 1) | self.bit(i)))
    }

    /// Two's complement signed field
    pub(crate) fn int(&self, start: usize, len: usize) -> Option<i64> {
        let raw = self.uint(start, len)?;
        let shift = 64 - len as u32;
        Some(((raw << shift) as i64) >> shift)
    }

    pub(crate) fn flag(&self, index: usize) -> Option<bool> {
        self.uint(index, 1).map(|b| b == 1)
    }

    /// Six-bit ASCII text. Reads as many whole characters as the payload
    /// holds, stops at the first `@` pad and trims trailing spaces.
    pub(crate) fn text(&self, start: usize, len: usize) -> Option<String> {
        let available = self.bit_len.saturating_sub(start).min(len);
        let mut text = String::with_capacity(available / 6);
        for k in 0..available / 6 {
            let value = self.uint(start + 6 * k, 6)? as u8;
            let ch = if value < 32 { value + 64 } else { value } as char;
            if ch == '@' {
                break;
            }
            text.push(ch);
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

fn unarmor(byte: u8) -> Result<u8, DecodeError> {
    match byte {
        b'0'..=b'W' => Ok(byte - 48),
        b'`'..=b'w' => Ok(byte - 56),
        _ => Err(DecodeError::InvalidPayload(format!(
            "invalid armor character {:?}",
            byte as char
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unarmor_boundaries() {
        assert_eq!(unarmor(b'0').unwrap(), 0);
        assert_eq!(unarmor(b'W').unwrap(), 39);
        assert_eq!(unarmor(b'`').unwrap(), 40);
        assert_eq!(unarmor(b'w').unwrap(), 63);
        assert!(unarmor(b'X').is_err());
        assert!(unarmor(b'x').is_err());
    }

    #[test]
    fn reads_fields_across_symbols() {
        // "1" = 000001, "w" = 111111
        let payload = Payload::from_armored("1w", 0).unwrap();
        assert_eq!(payload.bit_len(), 12);
        assert_eq!(payload.uint(0, 6), Some(1));
        assert_eq!(payload.uint(4, 4), Some(0b0111));
        assert_eq!(payload.int(6, 6), Some(-1));
        assert_eq!(payload.uint(8, 6), None);
        assert_eq!(payload.flag(5), Some(true));
    }

    #[test]
    fn fill_bits_shorten_payload() {
        let payload = Payload::from_armored("1w", 2).unwrap();
        assert_eq!(payload.bit_len(), 10);
        assert_eq!(payload.uint(6, 4), Some(0b1111));
        assert_eq!(payload.uint(6, 6), None);
    }

    #[test]
    fn text_stops_at_padding() {
        // "A" = 1, "B" = 2, "@" = 0
        let payload = Payload::from_armored("1200", 0).unwrap();
        assert_eq!(payload.text(0, 24), Some("AB".to_string()));
        let blank = Payload::from_armored("00", 0).unwrap();
        assert_eq!(blank.text(0, 12), None);
    }
}
