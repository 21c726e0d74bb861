//! Bit-exact game protocol
//!
//! Every message starts with a one-byte tag; multi-byte values are
//! little-endian and floats are IEEE-754 f32. A client buffer may carry
//! several messages back to back, decoded in order until exhausted.

use crate::game::entity::{EntityId, Rotation, Spider};
use crate::net::framing::{FrameBuilder, FrameReader};

/// Message tags shared by both directions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    UpdateData = 101,
    Moving = 102,
    NotMoving = 103,
    RotatingLeft = 104,
    RotatingRight = 105,
    NotRotating = 106,
    NameRequest = 107,
    SpawnMe = 123,
    Ping = 201,
    YouDied = 202,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            101 => MessageType::UpdateData,
            102 => MessageType::Moving,
            103 => MessageType::NotMoving,
            104 => MessageType::RotatingLeft,
            105 => MessageType::RotatingRight,
            106 => MessageType::NotRotating,
            107 => MessageType::NameRequest,
            123 => MessageType::SpawnMe,
            201 => MessageType::Ping,
            202 => MessageType::YouDied,
            other => return Err(ProtocolError::UnknownMessageType(other)),
        })
    }
}

/// Errors that abort decoding of the current buffer
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("{0:?} is not accepted from clients")]
    UnexpectedMessage(MessageType),
    #[error("{message:?} truncated: {available} of {needed} payload bytes present")]
    Truncated {
        message: MessageType,
        needed: usize,
        available: usize,
    },
    #[error("{message:?} carries a non-finite value")]
    NonFinite { message: MessageType },
    #[error("message names spider {claimed}, connection owns {owned:?}")]
    KeyMismatch {
        claimed: EntityId,
        owned: Option<EntityId>,
    },
    #[error("{0} entries do not fit a u16 count")]
    TooManyEntries(usize),
}

/// Commands a client can send
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClientMessage {
    SpawnMe,
    UpdateData {
        id: EntityId,
        x: f32,
        y: f32,
        angle: f32,
    },
    SetMoving {
        id: EntityId,
        moving: bool,
    },
    SetRotation {
        id: EntityId,
        rotation: Rotation,
    },
    Ping,
    NameRequest {
        id: EntityId,
    },
}

impl ClientMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ClientMessage::SpawnMe => MessageType::SpawnMe,
            ClientMessage::UpdateData { .. } => MessageType::UpdateData,
            ClientMessage::SetMoving { moving: true, .. } => MessageType::Moving,
            ClientMessage::SetMoving { moving: false, .. } => MessageType::NotMoving,
            ClientMessage::SetRotation { rotation, .. } => match rotation {
                Rotation::Left => MessageType::RotatingLeft,
                Rotation::Right => MessageType::RotatingRight,
                Rotation::None => MessageType::NotRotating,
            },
            ClientMessage::Ping => MessageType::Ping,
            ClientMessage::NameRequest { .. } => MessageType::NameRequest,
        }
    }

    /// The spider this command claims to act on, if any
    pub fn claimed_id(&self) -> Option<EntityId> {
        match *self {
            ClientMessage::UpdateData { id, .. }
            | ClientMessage::SetMoving { id, .. }
            | ClientMessage::SetRotation { id, .. } => Some(id),
            ClientMessage::SpawnMe | ClientMessage::Ping | ClientMessage::NameRequest { .. } => None,
        }
    }

    /// Client-side encoding, used by tests and load tools
    pub fn encode(&self) -> Vec<u8> {
        let frame = FrameBuilder::with_capacity(15).write_u8(self.message_type() as u8);
        match *self {
            ClientMessage::SpawnMe | ClientMessage::Ping => frame.build(),
            ClientMessage::UpdateData { id, x, y, angle } => frame
                .write_u16(id)
                .write_f32(x)
                .write_f32(y)
                .write_f32(angle)
                .build(),
            ClientMessage::SetMoving { id, .. }
            | ClientMessage::SetRotation { id, .. }
            | ClientMessage::NameRequest { id } => frame.write_u16(id).build(),
        }
    }
}

/// Decodes the messages packed into one client buffer.
///
/// Stops for good after the first error; the rest of the buffer is dropped.
pub struct MessageDecoder<'a> {
    reader: FrameReader<'a>,
    failed: bool,
}

pub fn decode_messages(buffer: &[u8]) -> MessageDecoder<'_> {
    MessageDecoder {
        reader: FrameReader::new(buffer),
        failed: false,
    }
}

impl<'a> MessageDecoder<'a> {
    fn need(&self, message: MessageType, needed: usize) -> Result<(), ProtocolError> {
        let available = self.reader.remaining_len();
        if available < needed {
            return Err(ProtocolError::Truncated {
                message,
                needed,
                available,
            });
        }
        Ok(())
    }

    fn read_id(&mut self, message: MessageType) -> Result<EntityId, ProtocolError> {
        self.need(message, 2)?;
        self.reader.read_u16().ok_or(ProtocolError::Truncated {
            message,
            needed: 2,
            available: 0,
        })
    }

    fn next_message(&mut self) -> Result<ClientMessage, ProtocolError> {
        let tag = self.reader.read_u8().ok_or(ProtocolError::UnknownMessageType(0))?;
        let message = MessageType::try_from(tag)?;

        Ok(match message {
            MessageType::SpawnMe => ClientMessage::SpawnMe,
            MessageType::Ping => ClientMessage::Ping,
            MessageType::UpdateData => {
                self.need(message, 14)?;
                let id = self.read_id(message)?;
                let mut values = [0.0f32; 3];
                for value in &mut values {
                    *value = self.reader.read_f32().ok_or(ProtocolError::Truncated {
                        message,
                        needed: 14,
                        available: self.reader.remaining_len(),
                    })?;
                }
                if values.iter().any(|v| !v.is_finite()) {
                    return Err(ProtocolError::NonFinite { message });
                }
                let [x, y, angle] = values;
                ClientMessage::UpdateData { id, x, y, angle }
            }
            MessageType::Moving | MessageType::NotMoving => ClientMessage::SetMoving {
                id: self.read_id(message)?,
                moving: message == MessageType::Moving,
            },
            MessageType::RotatingLeft | MessageType::RotatingRight | MessageType::NotRotating => {
                let rotation = match message {
                    MessageType::RotatingLeft => Rotation::Left,
                    MessageType::RotatingRight => Rotation::Right,
                    _ => Rotation::None,
                };
                ClientMessage::SetRotation {
                    id: self.read_id(message)?,
                    rotation,
                }
            }
            MessageType::NameRequest => ClientMessage::NameRequest {
                id: self.read_id(message)?,
            },
            MessageType::YouDied => return Err(ProtocolError::UnexpectedMessage(message)),
        })
    }
}

impl<'a> Iterator for MessageDecoder<'a> {
    type Item = Result<ClientMessage, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || !self.reader.has_remaining() {
            return None;
        }
        let result = self.next_message();
        self.failed = result.is_err();
        Some(result)
    }
}

/// Wire bytes of a name: truncated to what the length byte can describe
fn name_bytes(name: &str) -> &[u8] {
    let bytes = name.as_bytes();
    &bytes[..bytes.len().min(u8::MAX as usize)]
}

/// Spawn confirmation sent to the owning client
pub fn encode_spawn(arena_size: u16, spider: &Spider) -> Vec<u8> {
    let name = name_bytes(&spider.name);
    FrameBuilder::with_capacity(18 + name.len())
        .write_u8(MessageType::SpawnMe as u8)
        .write_u16(arena_size)
        .write_u16(spider.id)
        .write_f32(spider.position.x)
        .write_f32(spider.position.y)
        .write_f32(spider.angle)
        .write_u8(name.len() as u8)
        .write(name)
        .build()
}

/// Reply to a NameRequest
pub fn encode_name(id: EntityId, name: &str) -> Vec<u8> {
    let name = name_bytes(name);
    FrameBuilder::with_capacity(4 + name.len())
        .write_u8(MessageType::NameRequest as u8)
        .write_u16(id)
        .write_u8(name.len() as u8)
        .write(name)
        .build()
}

pub fn encode_you_died() -> Vec<u8> {
    vec![MessageType::YouDied as u8]
}

pub fn encode_ping() -> Vec<u8> {
    vec![MessageType::Ping as u8]
}

/// Bytes per entity record in an UpdateData message
pub const ENTITY_RECORD_LEN: usize = 23;

/// One entity record of an UpdateData message
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityUpdate {
    pub id: EntityId,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub size: f32,
    pub moving: bool,
    pub rotating: i8,
    pub state: u8,
    pub kills: u16,
}

impl EntityUpdate {
    pub fn from_spider(spider: &Spider) -> Self {
        Self {
            id: spider.id,
            x: spider.position.x,
            y: spider.position.y,
            angle: spider.angle,
            size: spider.size,
            moving: spider.moving,
            rotating: spider.rotation.wire_value(),
            state: spider.wire_state(),
            kills: spider.kills,
        }
    }
}

/// Decoded UpdateData payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdatePayload {
    pub entities: Vec<EntityUpdate>,
    pub removed: Vec<EntityId>,
}

fn wire_count(len: usize) -> Result<u16, ProtocolError> {
    u16::try_from(len).map_err(|_| ProtocolError::TooManyEntries(len))
}

/// Build an UpdateData message from entity records and removed ids
pub fn encode_update<'a, I>(spiders: I, removed: &[EntityId]) -> Result<Vec<u8>, ProtocolError>
where
    I: ExactSizeIterator<Item = &'a Spider>,
{
    let count = wire_count(spiders.len())?;
    let removed_count = wire_count(removed.len())?;

    let mut frame = FrameBuilder::with_capacity(
        5 + ENTITY_RECORD_LEN * count as usize + 2 * removed_count as usize,
    )
    .write_u8(MessageType::UpdateData as u8)
    .write_u16(count);

    for spider in spiders {
        let update = EntityUpdate::from_spider(spider);
        frame = frame
            .write_u16(update.id)
            .write_f32(update.x)
            .write_f32(update.y)
            .write_f32(update.angle)
            .write_f32(update.size)
            .write_u8(update.moving as u8)
            .write_i8(update.rotating)
            .write_u8(update.state)
            .write_u16(update.kills);
    }

    frame = frame.write_u16(removed_count);
    for &id in removed {
        frame = frame.write_u16(id);
    }
    Ok(frame.build())
}

/// Client-side decoding of an UpdateData message
pub fn decode_update(buffer: &[u8]) -> Result<UpdatePayload, ProtocolError> {
    let message = MessageType::UpdateData;
    let truncated = |reader: &FrameReader<'_>, needed: usize| ProtocolError::Truncated {
        message,
        needed,
        available: reader.remaining_len(),
    };

    let mut reader = FrameReader::new(buffer);
    let tag = reader.read_u8().ok_or(ProtocolError::UnknownMessageType(0))?;
    if MessageType::try_from(tag)? != message {
        return Err(ProtocolError::UnknownMessageType(tag));
    }

    let count = reader.read_u16().ok_or_else(|| truncated(&reader, 2))? as usize;
    let mut payload = UpdatePayload::default();
    payload.entities.reserve(count);
    for _ in 0..count {
        let record = reader
            .read(ENTITY_RECORD_LEN)
            .ok_or_else(|| truncated(&reader, ENTITY_RECORD_LEN))?;
        let mut fields = FrameReader::new(record);
        let (Some(id), Some(x), Some(y), Some(angle), Some(size), Some(moving), Some(rotating), Some(state), Some(kills)) = (
            fields.read_u16(),
            fields.read_f32(),
            fields.read_f32(),
            fields.read_f32(),
            fields.read_f32(),
            fields.read_u8(),
            fields.read_i8(),
            fields.read_u8(),
            fields.read_u16(),
        ) else {
            return Err(truncated(&reader, ENTITY_RECORD_LEN));
        };
        payload.entities.push(EntityUpdate {
            id,
            x,
            y,
            angle,
            size,
            moving: moving != 0,
            rotating,
            state,
            kills,
        });
    }

    let removed_count = reader.read_u16().ok_or_else(|| truncated(&reader, 2))? as usize;
    for _ in 0..removed_count {
        payload
            .removed
            .push(reader.read_u16().ok_or_else(|| truncated(&reader, 2))?);
    }
    Ok(payload)
}
