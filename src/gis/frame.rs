use crate::prelude::*;
use crate::register::{Encoding, RegisterSlot, SlotKind};

use bytes::{BufMut, Bytes, BytesMut};
use nom::number::complete::be_u16;
use nom::sequence::pair;
use serde::Serialize;

/// Rouses the device from its low-power state.
pub const WAKE_UP: [u8; 4] = [0xFF, 0xFE, 0xFF, 0xFE];

pub const TRANSACTION_ID: u16 = 0x0001;
pub const PROTOCOL_ID: u16 = 0x0000;
pub const UNIT_ID: u8 = 0x02;
pub const FUNCTION_READ_INPUT: u8 = 0x04;
pub const START_ADDRESS: u16 = 0x0064;
pub const REGISTER_QUANTITY: u16 = 0x018F;

/// MBAP header plus function code and byte count; discarded on decode.
pub const HEADER_LEN: usize = 9;
/// A complete reply to the read request.
pub const RESPONSE_LEN: usize = HEADER_LEN + REGISTER_QUANTITY as usize * 2;

/// Register values from one response. Built fresh on every decode.
///
/// The three sequences are filled independently, so a truncated frame can
/// leave them with different lengths. Only index-match up to the shortest.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecodedSample {
    pub counters: Vec<u16>,
    pub amplitudes: Vec<f64>,
    pub phases: Vec<f64>,
}

impl DecodedSample {
    /// Index-matched (phase, amplitude) pairs, as plotted on the PRPD chart.
    pub fn points(&self) -> Vec<(f64, f64)> {
        self.phases
            .iter()
            .copied()
            .zip(self.amplitudes.iter().copied())
            .collect()
    }
}

pub fn encode_wake_up() -> [u8; 4] {
    WAKE_UP
}

/// The one read request the device understands: all 399 input registers
/// from address 100.
pub fn encode_read_request() -> Bytes {
    let mut r = BytesMut::with_capacity(12);

    r.put_u16(TRANSACTION_ID);
    r.put_u16(PROTOCOL_ID);
    r.put_u16(6); // bytes following: unit, function, start, quantity
    r.put_u8(UNIT_ID);
    r.put_u8(FUNCTION_READ_INPUT);
    r.put_u16(START_ADDRESS);
    r.put_u16(REGISTER_QUANTITY);

    r.freeze()
}

/// Inverse of the device's float layout: the low word goes on the wire first.
pub fn encode_float_swapped(value: f32) -> [u8; 4] {
    let b = value.to_be_bytes();
    [b[2], b[3], b[0], b[1]]
}

pub fn decode_response(raw: &[u8]) -> Result<DecodedSample, DecodeError> {
    if raw.len() <= HEADER_LEN {
        return Err(DecodeError::ShortFrame { len: raw.len() });
    }

    let payload = &raw[HEADER_LEN..];
    let mut sample = DecodedSample::default();

    for group in crate::register::RegisterMap::telemetry().groups() {
        for slot in &group.slots {
            let result = match slot.kind {
                SlotKind::Reserved => continue,
                SlotKind::Counter => read_u16(payload, slot).map(|v| sample.counters.push(v)),
                SlotKind::Amplitude => {
                    read_f32_swapped(payload, slot).map(|v| sample.amplitudes.push(round2(v as f64)))
                }
                SlotKind::Phase => read_f32_swapped(payload, slot).map(|v| sample.phases.push(v as f64)),
            };

            if let Err(e) = result {
                debug!("group {}: {}, slot skipped", group.index, e);
            }
        }
    }

    trace!(
        "decoded {} counters, {} amplitudes, {} phases from {} payload bytes",
        sample.counters.len(),
        sample.amplitudes.len(),
        sample.phases.len(),
        payload.len()
    );

    Ok(sample)
}

fn slot_bytes<'a>(payload: &'a [u8], slot: &RegisterSlot) -> Result<&'a [u8], DecodeError> {
    let offset = slot.offset();
    let needed = slot.encoding.byte_len();
    let available = payload.len().saturating_sub(offset);

    if available < needed {
        return Err(DecodeError::TruncatedSlot {
            address: slot.address,
            offset,
            needed,
            available,
        });
    }

    Ok(&payload[offset..offset + needed])
}

fn truncated(slot: &RegisterSlot, offset: usize, available: usize) -> DecodeError {
    DecodeError::TruncatedSlot {
        address: slot.address,
        offset,
        needed: slot.encoding.byte_len(),
        available,
    }
}

fn read_u16(payload: &[u8], slot: &RegisterSlot) -> Result<u16, DecodeError> {
    debug_assert_eq!(slot.encoding, Encoding::Int16Be);
    let input = slot_bytes(payload, slot)?;

    be_u16::<_, nom::error::Error<&[u8]>>(input)
        .map(|(_, v)| v)
        .map_err(|_| truncated(slot, slot.offset(), input.len()))
}

fn read_f32_swapped(payload: &[u8], slot: &RegisterSlot) -> Result<f32, DecodeError> {
    debug_assert_eq!(slot.encoding, Encoding::Float32SwappedBe);
    let input = slot_bytes(payload, slot)?;

    let (_, (hi, lo)) = pair(be_u16::<_, nom::error::Error<&[u8]>>, be_u16)(input)
        .map_err(|_| truncated(slot, slot.offset(), input.len()))?;

    Ok(f32::from_bits(((lo as u32) << 16) | hi as u32))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_up_bytes() {
        assert_eq!(encode_wake_up(), [0xFF, 0xFE, 0xFF, 0xFE]);
    }

    #[test]
    fn read_request_bytes() {
        assert_eq!(
            encode_read_request().as_ref(),
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x02, 0x04, 0x00, 0x64, 0x01, 0x8F]
        );
    }

    #[test]
    fn response_len_covers_requested_registers() {
        assert_eq!(RESPONSE_LEN, 807);
    }

    #[test]
    fn float_word_swap() {
        // 1.0f32 is 0x3F80_0000; the device sends the 0x0000 word first
        assert_eq!(encode_float_swapped(1.0), [0x00, 0x00, 0x3F, 0x80]);

        let mut raw = vec![0u8; HEADER_LEN];
        raw.extend_from_slice(&[0, 7, 0, 0]);
        raw.extend_from_slice(&[0x00, 0x00, 0x3F, 0x80]);
        raw.extend_from_slice(&encode_float_swapped(-12.5));

        let sample = decode_response(&raw).unwrap();
        assert_eq!(sample.counters, vec![7]);
        assert_eq!(sample.amplitudes, vec![1.0]);
        assert_eq!(sample.phases, vec![-12.5]);
    }

    #[test]
    fn amplitude_is_rounded_phase_is_not() {
        let mut raw = vec![0u8; HEADER_LEN];
        raw.extend_from_slice(&[0, 1, 0, 0]);
        raw.extend_from_slice(&encode_float_swapped(42.3456));
        raw.extend_from_slice(&encode_float_swapped(187.123_46));

        let sample = decode_response(&raw).unwrap();
        assert_eq!(sample.amplitudes, vec![42.35]);
        assert_eq!(sample.phases, vec![187.123_46f32 as f64]);
    }

    #[test]
    fn header_only_is_short() {
        assert_eq!(
            decode_response(&[0u8; 9]),
            Err(DecodeError::ShortFrame { len: 9 })
        );
    }

    #[test]
    fn partial_counter_is_skipped() {
        // header plus one byte: not enough for the first counter
        let sample = decode_response(&[0u8; 10]).unwrap();
        assert_eq!(sample, DecodedSample::default());
    }

    #[test]
    fn points_stop_at_shorter_sequence() {
        let sample = DecodedSample {
            counters: vec![1, 2, 3],
            amplitudes: vec![10.0, 20.0],
            phases: vec![90.0, 180.0, 270.0],
        };

        assert_eq!(sample.points(), vec![(90.0, 10.0), (180.0, 20.0)]);
    }
}
