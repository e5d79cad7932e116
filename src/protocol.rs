//! y-sync message codec.
//!
//! ```text
//! Message := VarUint(type) Payload
//!   0 Sync      := VarUint(step) VarUint8Array(payload)
//!                  step 0 = Step1 (state vector), 1 = Step2 (update), 2 = Update
//!   1 Awareness := VarUint8Array(awareness update)
//! ```

use crate::encoding::{DecodeError, Decoder, Encoder};

pub const MSG_SYNC: u64 = 0;
pub const MSG_AWARENESS: u64 = 1;

pub const SYNC_STEP1: u64 = 0;
pub const SYNC_STEP2: u64 = 1;
pub const SYNC_UPDATE: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// Encoded state vector of the sender.
    Step1(Vec<u8>),
    /// Update containing everything the requester was missing.
    Step2(Vec<u8>),
    /// Incremental update pushed at any time.
    Update(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Sync(SyncMessage),
    Awareness(Vec<u8>),
}

impl Message {
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::with_capacity(self.payload_len() + 4);
        self.encode_into(&mut enc);
        enc.into_vec()
    }

    pub fn encode_into(&self, enc: &mut Encoder) {
        match self {
            Message::Sync(sync) => {
                enc.write_var_uint(MSG_SYNC);
                let (step, payload) = match sync {
                    SyncMessage::Step1(sv) => (SYNC_STEP1, sv),
                    SyncMessage::Step2(update) => (SYNC_STEP2, update),
                    SyncMessage::Update(update) => (SYNC_UPDATE, update),
                };
                enc.write_var_uint(step);
                enc.write_var_bytes(payload);
            }
            Message::Awareness(update) => {
                enc.write_var_uint(MSG_AWARENESS);
                enc.write_var_bytes(update);
            }
        }
    }

    /// Decode the next message from `dec`.
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        match dec.read_var_uint()? {
            MSG_SYNC => {
                let step = dec.read_var_uint()?;
                let payload = dec.read_var_bytes()?.to_vec();
                let sync = match step {
                    SYNC_STEP1 => SyncMessage::Step1(payload),
                    SYNC_STEP2 => SyncMessage::Step2(payload),
                    SYNC_UPDATE => SyncMessage::Update(payload),
                    other => return Err(DecodeError::UnknownSyncStep(other)),
                };
                Ok(Message::Sync(sync))
            }
            MSG_AWARENESS => Ok(Message::Awareness(dec.read_var_bytes()?.to_vec())),
            other => Err(DecodeError::UnknownMessageType(other)),
        }
    }

    /// Decode every message in a frame. The whole frame is rejected if any
    /// message in it is malformed.
    pub fn decode_frame(data: &[u8]) -> Result<Vec<Self>, DecodeError> {
        let mut dec = Decoder::new(data);
        let mut msgs = Vec::new();
        while dec.has_content() {
            msgs.push(Self::decode(&mut dec)?);
        }
        if msgs.is_empty() {
            return Err(DecodeError::UnexpectedEof);
        }
        Ok(msgs)
    }

    fn payload_len(&self) -> usize {
        match self {
            Message::Sync(SyncMessage::Step1(b) | SyncMessage::Step2(b) | SyncMessage::Update(b)) => b.len(),
            Message::Awareness(b) => b.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_update_wire_layout() {
        let msg = Message::Sync(SyncMessage::Update(vec![9, 8, 7]));
        assert_eq!(msg.encode(), vec![0, 2, 3, 9, 8, 7]);
    }

    #[test]
    fn awareness_wire_layout() {
        let msg = Message::Awareness(vec![1, 2]);
        assert_eq!(msg.encode(), vec![1, 2, 1, 2]);
    }

    #[test]
    fn frame_with_several_messages_decodes_in_order() {
        let mut frame = Message::Sync(SyncMessage::Step1(vec![0])).encode();
        frame.extend(Message::Awareness(vec![4]).encode());
        frame.extend(Message::Sync(SyncMessage::Step2(vec![0, 0])).encode());

        let msgs = Message::decode_frame(&frame).unwrap();
        assert_eq!(
            msgs,
            vec![
                Message::Sync(SyncMessage::Step1(vec![0])),
                Message::Awareness(vec![4]),
                Message::Sync(SyncMessage::Step2(vec![0, 0])),
            ]
        );
    }

    #[test]
    fn unknown_message_type_is_malformed() {
        assert_eq!(Message::decode_frame(&[99, 0]), Err(DecodeError::UnknownMessageType(99)));
    }

    #[test]
    fn unknown_sync_step_is_malformed() {
        assert_eq!(Message::decode_frame(&[0, 7, 0]), Err(DecodeError::UnknownSyncStep(7)));
    }

    #[test]
    fn truncated_frames_are_malformed() {
        assert_eq!(Message::decode_frame(&[]), Err(DecodeError::UnexpectedEof));
        assert_eq!(Message::decode_frame(&[0, 2, 5, 1]), Err(DecodeError::UnexpectedEof));
        // second message cut short
        let mut frame = Message::Awareness(vec![1]).encode();
        frame.push(MSG_SYNC as u8);
        assert_eq!(Message::decode_frame(&frame), Err(DecodeError::UnexpectedEof));
    }
}
