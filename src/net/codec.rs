//! Binary codec for sequenced traffic.
//!
//! Input batches and world states are hand-packed with `bytes`. All
//! integers and floats are big-endian.
//!
//! An input frame is one key byte followed by the orientation and the
//! view delta. With quaternion compression the orientation is stored as
//! smallest-three: the index of the largest component lives in the two
//! high bits of the key byte and the remaining three components follow as
//! `i16` fixed-point values. Without compression it is four `f32`s.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use glam::{Quat, Vec3};
use thiserror::Error;

use crate::game::{InputFrame, StateSnapshot, HISTORY_CAPACITY};

use super::protocol::{EntityState, TickInputBatch, TickInputFrame, WorldStateMessage};

/// Largest frame count a decoder accepts in one batch
pub const MAX_WIRE_FRAMES: u32 = HISTORY_CAPACITY as u32;

/// Encoded size of one [`EntityState`]
const ENTITY_STATE_LEN: usize = 43;

const QUAT_INDEX_SHIFT: u8 = 6;
const QUAT_RANGE: f32 = std::f32::consts::FRAC_1_SQRT_2;
const QUAT_SCALE: f32 = i16::MAX as f32;

/// Errors that can occur during encoding/decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer truncated: needed {needed} more bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },

    #[error("frame count {0} exceeds limit of {MAX_WIRE_FRAMES}")]
    TooManyFrames(u32),

    #[error("invalid quaternion")]
    InvalidQuaternion,
}

fn need(remaining: usize, needed: usize) -> Result<(), CodecError> {
    if remaining < needed {
        return Err(CodecError::Truncated { needed, remaining });
    }
    Ok(())
}

/// Largest-component index and the other three components, scaled into
/// `[-1, 1]`. The sign is flipped so the dropped component is positive.
fn smallest_three(q: Quat) -> (u8, [i16; 3]) {
    let mut components = q.normalize().to_array();
    let largest = components
        .iter()
        .enumerate()
        .fold(0, |best, (i, c)| if c.abs() > components[best].abs() { i } else { best });
    if components[largest] < 0.0 {
        for c in &mut components {
            *c = -*c;
        }
    }

    let mut packed = [0i16; 3];
    let mut slot = 0;
    for (i, c) in components.iter().enumerate() {
        if i == largest {
            continue;
        }
        let scaled = (c / QUAT_RANGE).clamp(-1.0, 1.0) * QUAT_SCALE;
        packed[slot] = scaled.round() as i16;
        slot += 1;
    }
    (largest as u8, packed)
}

fn from_smallest_three(largest: u8, packed: [i16; 3]) -> Result<Quat, CodecError> {
    let largest = usize::from(largest);
    if largest > 3 {
        return Err(CodecError::InvalidQuaternion);
    }

    let mut components = [0.0f32; 4];
    let mut sum_sq = 0.0;
    let mut slot = 0;
    for (i, c) in components.iter_mut().enumerate() {
        if i == largest {
            continue;
        }
        *c = f32::from(packed[slot]) / QUAT_SCALE * QUAT_RANGE;
        sum_sq += *c * *c;
        slot += 1;
    }
    components[largest] = (1.0 - sum_sq).max(0.0).sqrt();
    Ok(Quat::from_array(components))
}

fn put_quat(buf: &mut BytesMut, q: Quat) {
    for c in q.to_array() {
        buf.put_f32(c);
    }
}

fn get_quat(buf: &mut impl Buf) -> Result<Quat, CodecError> {
    need(buf.remaining(), 16)?;
    let q = Quat::from_xyzw(buf.get_f32(), buf.get_f32(), buf.get_f32(), buf.get_f32());
    if !q.is_finite() || q.length_squared() < 1e-6 {
        return Err(CodecError::InvalidQuaternion);
    }
    Ok(q)
}

fn put_vec3(buf: &mut BytesMut, v: Vec3) {
    buf.put_f32(v.x);
    buf.put_f32(v.y);
    buf.put_f32(v.z);
}

fn get_vec3(buf: &mut impl Buf) -> Result<Vec3, CodecError> {
    need(buf.remaining(), 12)?;
    Ok(Vec3::new(buf.get_f32(), buf.get_f32(), buf.get_f32()))
}

/// Append one input frame
pub fn put_input_frame(buf: &mut BytesMut, frame: &TickInputFrame, compress_quat: bool) {
    let keys = frame.input.key_bits() & InputFrame::KEY_MASK;
    if compress_quat {
        let (largest, packed) = smallest_three(frame.input.view);
        buf.put_u8(keys | (largest << QUAT_INDEX_SHIFT));
        for value in packed {
            buf.put_i16(value);
        }
    } else {
        buf.put_u8(keys);
        put_quat(buf, frame.input.view);
    }
    buf.put_i16(frame.view_delta);
}

/// Read one input frame
pub fn get_input_frame(buf: &mut impl Buf, compress_quat: bool) -> Result<TickInputFrame, CodecError> {
    need(buf.remaining(), 1)?;
    let byte = buf.get_u8();
    let view = if compress_quat {
        need(buf.remaining(), 6)?;
        let packed = [buf.get_i16(), buf.get_i16(), buf.get_i16()];
        from_smallest_three(byte >> QUAT_INDEX_SHIFT, packed)?
    } else {
        get_quat(buf)?
    };
    need(buf.remaining(), 2)?;
    let view_delta = buf.get_i16();
    Ok(TickInputFrame {
        input: InputFrame::with_key_bits(byte, view),
        view_delta,
    })
}

/// Round an input through the wire format so the sender predicts with
/// exactly what the receiver will decode
pub fn quantize_input(input: &InputFrame, compress_quat: bool) -> InputFrame {
    if !compress_quat {
        return *input;
    }
    let (largest, packed) = smallest_three(input.view);
    match from_smallest_three(largest, packed) {
        Ok(view) => InputFrame { view, ..*input },
        Err(_) => *input,
    }
}

/// Encode an input batch
pub fn encode_batch(batch: &TickInputBatch, compress_quat: bool) -> Bytes {
    let frame_len = if compress_quat { 9 } else { 19 };
    let mut buf = BytesMut::with_capacity(8 + batch.frames.len() * frame_len);
    buf.put_u32(batch.start_tick);
    buf.put_u32(batch.frames.len() as u32);
    for frame in &batch.frames {
        put_input_frame(&mut buf, frame, compress_quat);
    }
    buf.freeze()
}

/// Decode an input batch
pub fn decode_batch(mut data: &[u8], compress_quat: bool) -> Result<TickInputBatch, CodecError> {
    need(data.remaining(), 8)?;
    let start_tick = data.get_u32();
    let frame_count = data.get_u32();
    if frame_count > MAX_WIRE_FRAMES {
        return Err(CodecError::TooManyFrames(frame_count));
    }

    let mut frames = Vec::with_capacity(frame_count as usize);
    for _ in 0..frame_count {
        frames.push(get_input_frame(&mut data, compress_quat)?);
    }
    Ok(TickInputBatch { start_tick, frames })
}

fn put_entity_state(buf: &mut BytesMut, entity: &EntityState) {
    buf.put_u16(entity.entity);
    put_vec3(buf, entity.state.position);
    put_quat(buf, entity.state.orientation);
    put_vec3(buf, entity.state.velocity);
    buf.put_u8(u8::from(entity.state.grounded));
}

fn get_entity_state(buf: &mut impl Buf) -> Result<EntityState, CodecError> {
    need(buf.remaining(), 2)?;
    let entity = buf.get_u16();
    let position = get_vec3(buf)?;
    let orientation = get_quat(buf)?;
    let velocity = get_vec3(buf)?;
    need(buf.remaining(), 1)?;
    let grounded = buf.get_u8() != 0;
    Ok(EntityState {
        entity,
        state: StateSnapshot {
            position,
            orientation,
            velocity,
            grounded,
        },
    })
}

/// Encoded size of one world state
pub fn world_state_len(msg: &WorldStateMessage) -> usize {
    10 + msg.entity_states.len() * ENTITY_STATE_LEN
}

/// Encode a world state. Entities past `u16::MAX` are not sent.
pub fn encode_world_state(msg: &WorldStateMessage) -> Bytes {
    let count = msg.entity_states.len().min(usize::from(u16::MAX));
    let mut buf = BytesMut::with_capacity(world_state_len(msg));
    buf.put_u32(msg.tick);
    buf.put_u32(msg.your_latest_input_tick);
    buf.put_u16(count as u16);
    for entity in msg.entity_states.iter().take(count) {
        put_entity_state(&mut buf, entity);
    }
    buf.freeze()
}

/// Decode a world state
pub fn decode_world_state(mut data: &[u8]) -> Result<WorldStateMessage, CodecError> {
    need(data.remaining(), 10)?;
    let tick = data.get_u32();
    let your_latest_input_tick = data.get_u32();
    let count = data.get_u16();

    // The count is untrusted; never reserve more than the payload can hold
    let mut entity_states = Vec::with_capacity(usize::from(count).min(data.remaining() / ENTITY_STATE_LEN));
    for _ in 0..count {
        entity_states.push(get_entity_state(&mut data)?);
    }
    Ok(WorldStateMessage {
        tick,
        your_latest_input_tick,
        entity_states,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn same_rotation(a: Quat, b: Quat) -> bool {
        let direct = (a - b).to_array().iter().all(|d| d.abs() <= 1e-4);
        let flipped = (a + b).to_array().iter().all(|d| d.abs() <= 1e-4);
        direct || flipped
    }

    fn sample_views() -> Vec<Quat> {
        vec![
            Quat::IDENTITY,
            Quat::from_rotation_y(2.5),
            Quat::from_euler(glam::EulerRot::YXZ, -1.2, 0.4, 0.1),
            Quat::from_xyzw(-0.5, 0.5, -0.5, -0.5),
            Quat::from_rotation_x(std::f32::consts::PI),
        ]
    }

    #[test]
    fn roundtrip_batch_compressed() {
        let frames = sample_views()
            .into_iter()
            .enumerate()
            .map(|(i, view)| TickInputFrame {
                input: InputFrame::with_key_bits(i as u8 * 13, view),
                view_delta: i as i16 - 2,
            })
            .collect::<Vec<_>>();
        let batch = TickInputBatch {
            start_tick: 4_000_000,
            frames,
        };

        let decoded = decode_batch(&encode_batch(&batch, true), true).unwrap();

        assert_eq!(decoded.start_tick, batch.start_tick);
        assert_eq!(decoded.frames.len(), batch.frames.len());
        for (orig, dec) in batch.frames.iter().zip(&decoded.frames) {
            assert_eq!(orig.input.key_bits(), dec.input.key_bits());
            assert_eq!(orig.view_delta, dec.view_delta);
            assert!(same_rotation(orig.input.view, dec.input.view), "{:?} vs {:?}", orig.input.view, dec.input.view);
        }
    }

    #[test]
    fn roundtrip_batch_uncompressed_is_exact() {
        let batch = TickInputBatch {
            start_tick: 9,
            frames: vec![TickInputFrame {
                input: InputFrame {
                    fire: true,
                    ..InputFrame::forward(Quat::from_rotation_z(0.3))
                },
                view_delta: i16::MIN,
            }],
        };
        let decoded = decode_batch(&encode_batch(&batch, false), false).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn quantized_input_survives_the_wire_unchanged() {
        let views = [
            Quat::IDENTITY,
            Quat::from_rotation_y(2.5),
            Quat::from_euler(glam::EulerRot::YXZ, -1.2, 0.4, 0.1),
            Quat::from_rotation_x(std::f32::consts::PI),
        ];
        for view in views {
            let input = quantize_input(&InputFrame::forward(view), true);
            let frame = TickInputFrame { input, view_delta: 0 };
            let batch = TickInputBatch {
                start_tick: 1,
                frames: vec![frame],
            };
            let decoded = decode_batch(&encode_batch(&batch, true), true).unwrap();
            assert_eq!(decoded.frames[0].input, input);
        }
    }

    #[test]
    fn compressed_frames_are_compact() {
        let batch = TickInputBatch {
            start_tick: 0,
            frames: vec![
                TickInputFrame {
                    input: InputFrame::neutral(),
                    view_delta: 0,
                };
                10
            ],
        };
        assert_eq!(encode_batch(&batch, true).len(), 8 + 10 * 9);
        assert_eq!(encode_batch(&batch, false).len(), 8 + 10 * 19);
    }

    #[test]
    fn truncated_batch_is_rejected() {
        let batch = TickInputBatch {
            start_tick: 3,
            frames: vec![
                TickInputFrame {
                    input: InputFrame::neutral(),
                    view_delta: 1,
                };
                2
            ],
        };
        let encoded = encode_batch(&batch, true);
        let err = decode_batch(&encoded[..encoded.len() - 1], true).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }

    #[test]
    fn oversized_frame_count_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        buf.put_u32(MAX_WIRE_FRAMES + 1);
        assert_eq!(
            decode_batch(&buf, true).unwrap_err(),
            CodecError::TooManyFrames(MAX_WIRE_FRAMES + 1)
        );
    }

    #[test]
    fn zero_quaternion_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        buf.put_u32(1);
        buf.put_u8(0);
        put_quat(&mut buf, Quat::from_xyzw(0.0, 0.0, 0.0, 0.0));
        buf.put_i16(0);
        assert_eq!(decode_batch(&buf, false).unwrap_err(), CodecError::InvalidQuaternion);
    }

    #[test]
    fn roundtrip_world_state() {
        let msg = WorldStateMessage {
            tick: 200,
            your_latest_input_tick: 204,
            entity_states: vec![
                EntityState {
                    entity: 1,
                    state: StateSnapshot {
                        position: Vec3::new(1.5, 0.25, -3.0),
                        orientation: Quat::from_rotation_y(1.0),
                        velocity: Vec3::new(0.0, 8.0, 15.0),
                        grounded: false,
                    },
                },
                EntityState {
                    entity: 7,
                    state: StateSnapshot::default(),
                },
            ],
        };
        let encoded = encode_world_state(&msg);
        assert_eq!(encoded.len(), world_state_len(&msg));
        assert_eq!(decode_world_state(&encoded).unwrap(), msg);
    }

    #[test]
    fn inflated_entity_count_is_truncated() {
        let mut packet = BytesMut::new();
        packet.put_u32(9);
        packet.put_u32(0);
        packet.put_u16(u16::MAX);
        let err = decode_world_state(&packet).unwrap_err();
        assert_eq!(
            err,
            CodecError::Truncated {
                needed: 2,
                remaining: 0
            }
        );
    }
}
