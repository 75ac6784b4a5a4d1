use log::trace;

use crate::protocol_types::primitives::VarInt;
use crate::protocol_types::traits::{ClientPacket, SizedProt};

/// Largest frame body a three byte length prefix can announce.
pub(crate) const MAX_FRAME_LEN: i32 = 2097151;

/// One `[varint length][varint id][payload]` unit of the wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Frame {
    pub(crate) id: VarInt,
    pub(crate) payload: Vec<u8>,
}

impl Frame {
    pub(crate) fn new(id: VarInt, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    /// Length announced in the prefix: id plus payload, excluding the prefix itself.
    pub(crate) fn length(&self) -> usize {
        self.id.prot_size() + self.payload.len()
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let length = VarInt::from(self.length());
        let mut buf = Vec::with_capacity(length.prot_size() + self.length());
        length.encode(&mut buf);
        self.id.encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Splits the first complete frame off `bytes`, returning it together with the number of
    /// bytes it occupied. `Ok(None)` means the frame is not complete yet.
    pub(crate) fn decode(bytes: &[u8]) -> Result<Option<(Frame, usize)>, String> {
        let Some((length, prefix_len)) = VarInt::decode(bytes)? else {
            return Ok(None);
        };
        if length.value <= 0 || length.value > MAX_FRAME_LEN {
            return Err(format!("Invalid frame length {}", length.value));
        }
        let end = prefix_len + length.value as usize;
        if bytes.len() < end {
            return Ok(None);
        }
        let body = &bytes[prefix_len..end];
        let (id, id_len) = VarInt::decode(body)?
            .ok_or_else(|| format!("Frame of length {} has a truncated packet id", length))?;
        Ok(Some((Frame::new(id, body[id_len..].to_vec()), end)))
    }
}

/// Writes a clientbound packet's fields and frames them with its id.
pub(crate) async fn encode_packet<P: ClientPacket>(packet: &P) -> Result<Vec<u8>, String> {
    trace!("Outbound packet: {packet:?}");
    let mut payload = Vec::with_capacity(packet.prot_size());
    packet.write(&mut payload).await?;
    Ok(Frame::new(VarInt::from(P::id() as i32), payload).encode())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_then_decode_reproduces_frame() {
        for (id, payload) in [(0x00, vec![]), (0x21, vec![1, 2, 3]), (0x7f, vec![0xaa; 300])] {
            let frame = Frame::new(VarInt::from(id), payload);
            let bytes = frame.encode();
            let (decoded, used) = Frame::decode(&bytes).unwrap().unwrap();
            assert_eq!(decoded, frame);
            assert_eq!(used, bytes.len());
            assert_eq!(decoded.length(), frame.length());
        }
    }

    #[test]
    fn length_prefix_excludes_itself() {
        let bytes = Frame::new(VarInt::from(0x01), vec![9, 9]).encode();
        assert_eq!(bytes, vec![3, 0x01, 9, 9]);
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let bytes = Frame::new(VarInt::from(0x02), vec![1; 10]).encode();
        assert_eq!(Frame::decode(&bytes[..5]).unwrap(), None);
        assert_eq!(Frame::decode(&[]).unwrap(), None);
    }

    #[test]
    fn back_to_back_frames_are_split() {
        let mut bytes = Frame::new(VarInt::from(0x00), vec![5]).encode();
        bytes.extend(Frame::new(VarInt::from(0x01), vec![6, 7]).encode());
        let (first, used) = Frame::decode(&bytes).unwrap().unwrap();
        assert_eq!(first.payload, vec![5]);
        let (second, _) = Frame::decode(&bytes[used..]).unwrap().unwrap();
        assert_eq!(second.id.value, 0x01);
        assert_eq!(second.payload, vec![6, 7]);
    }

    #[test]
    fn oversized_and_empty_lengths_are_rejected() {
        let mut bytes = vec![];
        VarInt::from(MAX_FRAME_LEN + 1).encode(&mut bytes);
        assert!(Frame::decode(&bytes).is_err());
        assert!(Frame::decode(&[0]).is_err());
    }
}
