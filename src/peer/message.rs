use super::error::PeerError;
use super::peer_id::PeerId;
use crate::constants::{EXTENSION_BIT, FAST_PEER_BIT, ID_LEN, MAX_MESSAGE_SIZE, PROTOCOL_STRING};
use crate::hash::InfoHash;
use bytes::{Buf, BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    Port = 9,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            9 => Ok(MessageId::Port),
            _ => Err(PeerError::InvalidMessageId(value)),
        }
    }
}

impl MessageId {
    /// Checks the length prefix of a message with this id.
    fn accepts_length(self, length: usize) -> bool {
        match self {
            MessageId::Choke
            | MessageId::Unchoke
            | MessageId::Interested
            | MessageId::NotInterested => length == 1,
            MessageId::Have => length == 5,
            MessageId::Bitfield => length >= 1,
            MessageId::Request | MessageId::Cancel => length == 13,
            MessageId::Piece => length >= 9,
            MessageId::Port => length == 3,
        }
    }
}

/// The opening message of a connection. Not length-prefixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol: Bytes,
    pub reserved: [u8; 8],
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            protocol: Bytes::from_static(PROTOCOL_STRING),
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    pub fn supports_extension_protocol(&self) -> bool {
        (self.reserved[5] & EXTENSION_BIT) != 0
    }

    pub fn supports_fast_peer(&self) -> bool {
        (self.reserved[7] & FAST_PEER_BIT) != 0
    }

    pub fn has_standard_protocol(&self) -> bool {
        self.protocol.as_ref() == PROTOCOL_STRING
    }

    pub fn encoded_len(&self) -> usize {
        1 + self.protocol.len() + 8 + 2 * ID_LEN
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u8(self.protocol.len() as u8);
        buf.put_slice(&self.protocol);
        buf.put_slice(&self.reserved);
        buf.put_slice(self.info_hash.as_bytes());
        buf.put_slice(self.peer_id.as_bytes());
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Length of the handshake at the start of `data`, or `None` if more
    /// bytes are needed to tell.
    pub fn frame_len(data: &[u8]) -> Option<usize> {
        let name_len = *data.first()? as usize;
        let total = 1 + name_len + 8 + 2 * ID_LEN;
        (data.len() >= total).then_some(total)
    }

    /// True if `data` starts like a standard handshake, as far as it goes.
    pub fn looks_like(data: &[u8]) -> bool {
        match data.split_first() {
            Some((&len, rest)) if len as usize == PROTOCOL_STRING.len() => {
                let n = rest.len().min(PROTOCOL_STRING.len());
                rest[..n] == PROTOCOL_STRING[..n]
            }
            _ => false,
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        let Some(total) = Self::frame_len(data) else {
            return Err(PeerError::InvalidHandshake("too short".into()));
        };
        if data[0] == 0 {
            return Err(PeerError::InvalidHandshake("empty protocol name".into()));
        }

        let name_end = 1 + data[0] as usize;
        let protocol = Bytes::copy_from_slice(&data[1..name_end]);

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[name_end..name_end + 8]);

        let hash_start = name_end + 8;
        let id_start = hash_start + ID_LEN;
        let info_hash = InfoHash::from_bytes(&data[hash_start..id_start])
            .ok_or_else(|| PeerError::InvalidHandshake("info hash".into()))?;
        let peer_id = PeerId::from_bytes(&data[id_start..total])
            .ok_or_else(|| PeerError::InvalidHandshake("peer id".into()))?;

        Ok(Self {
            protocol,
            reserved,
            info_hash,
            peer_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece: u32 },
    Bitfield(Bytes),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, data: Bytes },
    Cancel { index: u32, begin: u32, length: u32 },
    Port(u16),
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Message::KeepAlive => "keep-alive",
            Message::Choke => "choke",
            Message::Unchoke => "unchoke",
            Message::Interested => "interested",
            Message::NotInterested => "not interested",
            Message::Have { .. } => "have",
            Message::Bitfield(_) => "bitfield",
            Message::Request { .. } => "request",
            Message::Piece { .. } => "piece",
            Message::Cancel { .. } => "cancel",
            Message::Port(_) => "port",
        }
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Message::KeepAlive => {
                buf.put_u32(0);
            }
            Message::Choke => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Choke as u8);
            }
            Message::Unchoke => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Unchoke as u8);
            }
            Message::Interested => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Interested as u8);
            }
            Message::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(MessageId::NotInterested as u8);
            }
            Message::Have { piece } => {
                buf.put_u32(5);
                buf.put_u8(MessageId::Have as u8);
                buf.put_u32(*piece);
            }
            Message::Bitfield(bits) => {
                buf.put_u32(1 + bits.len() as u32);
                buf.put_u8(MessageId::Bitfield as u8);
                buf.put_slice(bits);
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                buf.put_u32(13);
                buf.put_u8(MessageId::Request as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, data } => {
                buf.reserve(13 + data.len());
                buf.put_u32(9 + data.len() as u32);
                buf.put_u8(MessageId::Piece as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(data);
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => {
                buf.put_u32(13);
                buf.put_u8(MessageId::Cancel as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Port(port) => {
                buf.put_u32(3);
                buf.put_u8(MessageId::Port as u8);
                buf.put_u16(*port);
            }
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Length of the complete frame at the start of `data`.
    ///
    /// Returns `Ok(None)` if more bytes are needed and an error if the bytes
    /// cannot start a valid message.
    pub fn frame_len(data: &[u8]) -> Result<Option<usize>, PeerError> {
        if data.len() < 4 {
            return Ok(None);
        }

        let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if length > MAX_MESSAGE_SIZE {
            return Err(PeerError::InvalidMessage(format!(
                "message too large: {}",
                length
            )));
        }
        if length == 0 {
            return Ok(Some(4));
        }

        let Some(&id) = data.get(4) else {
            return Ok(None);
        };
        let id = MessageId::try_from(id)?;
        if !id.accepts_length(length) {
            return Err(PeerError::InvalidMessage(format!(
                "bad length {} for {:?}",
                length, id
            )));
        }

        Ok((data.len() >= 4 + length).then_some(4 + length))
    }

    /// Decodes one complete frame. `Piece` payloads are slices of `data`,
    /// not copies.
    pub fn decode(mut data: Bytes) -> Result<Self, PeerError> {
        if data.len() < 4 {
            return Err(PeerError::InvalidMessage("too short".into()));
        }

        let length = data.get_u32() as usize;

        if length == 0 {
            return Ok(Message::KeepAlive);
        }

        if data.remaining() < length {
            return Err(PeerError::InvalidMessage("incomplete message".into()));
        }

        let id = MessageId::try_from(data.get_u8())?;
        if !id.accepts_length(length) {
            return Err(PeerError::InvalidMessage(format!(
                "bad length {} for {:?}",
                length, id
            )));
        }

        match id {
            MessageId::Choke => Ok(Message::Choke),
            MessageId::Unchoke => Ok(Message::Unchoke),
            MessageId::Interested => Ok(Message::Interested),
            MessageId::NotInterested => Ok(Message::NotInterested),
            MessageId::Have => Ok(Message::Have {
                piece: data.get_u32(),
            }),
            MessageId::Bitfield => Ok(Message::Bitfield(data.copy_to_bytes(length - 1))),
            MessageId::Request => Ok(Message::Request {
                index: data.get_u32(),
                begin: data.get_u32(),
                length: data.get_u32(),
            }),
            MessageId::Piece => {
                let index = data.get_u32();
                let begin = data.get_u32();
                let block_data = data.copy_to_bytes(length - 9);
                Ok(Message::Piece {
                    index,
                    begin,
                    data: block_data,
                })
            }
            MessageId::Cancel => Ok(Message::Cancel {
                index: data.get_u32(),
                begin: data.get_u32(),
                length: data.get_u32(),
            }),
            MessageId::Port => Ok(Message::Port(data.get_u16())),
        }
    }
}
