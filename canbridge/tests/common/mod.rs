//! Simplified Cyphal/CAN message engine and two codecs, shared by the tests and the examples
//!
//! The engine uses the Cyphal/CAN message identifier layout and tail byte, but skips the transfer
//! CRC and the toggle check.

#![allow(dead_code)]

use canbridge::arena::{Arena, Block};
use canbridge::codec::{Codec, CodecError};
use canbridge::core::{Mtu, NodeId, PortId, Priority, SubjectId, TransferId, TransferKind};
use canbridge::egress::TxQueue;
use canbridge::engine::{Accepted, EngineError, RxEngine, TxEngine};
use canbridge::frame::{
    CompletedTransfer, Deadline, GenericFrame, LengthCode, PendingFrame, TransferMeta,
};

const SOT: u8 = 0x80;
const EOT: u8 = 0x40;
const TOGGLE: u8 = 0x20;

pub fn message_can_id(priority: Priority, subject: SubjectId, source: NodeId) -> u32 {
    (u32::from(priority.into_u8()) << 26)
        | (3 << 21)
        | (u32::from(subject.into_u16()) << 8)
        | u32::from(source.into_u8())
}

pub struct MessageTx {
    queue: TxQueue,
}

impl MessageTx {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: TxQueue::new(capacity),
        }
    }
}

impl TxEngine for MessageTx {
    fn push(
        &mut self,
        arena: &mut Arena,
        meta: &TransferMeta,
        deadline: Deadline,
        payload: &[u8],
        mtu: Mtu,
    ) -> Result<usize, EngineError> {
        let PortId::Subject(subject) = meta.port else {
            return Err(EngineError::InvalidArgument);
        };
        let source = meta.source.ok_or(EngineError::InvalidArgument)?;
        let can_id = message_can_id(meta.priority, subject, source);

        let chunks: Vec<&[u8]> = if payload.is_empty() {
            vec![payload]
        } else {
            payload.chunks(mtu.bytes() - 1).collect()
        };
        if self.queue.len() + chunks.len() > self.queue.capacity() {
            return Err(EngineError::QueueFull);
        }

        let last = chunks.len() - 1;
        let mut blocks: Vec<Block> = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let mut tail = meta.transfer_id.into_u8();
            if index == 0 {
                tail |= SOT;
            }
            if index == last {
                tail |= EOT;
            }
            if index % 2 == 0 {
                tail |= TOGGLE;
            }
            // Pad so that the tail byte ends up last after length code rounding
            let length = LengthCode::for_length(chunk.len() + 1).unwrap().length();
            let mut data = chunk.to_vec();
            data.resize(length - 1, 0);
            data.push(tail);

            match arena.store(&data) {
                Ok(block) => blocks.push(block),
                Err(err) => {
                    for block in blocks {
                        arena.free(block);
                    }
                    return Err(err.into());
                }
            }
        }

        let count = blocks.len();
        for block in blocks {
            let frame = PendingFrame {
                can_id,
                priority: meta.priority,
                deadline,
                payload: block,
            };
            if let Err(frame) = self.queue.push(frame) {
                arena.free(frame.payload);
            }
        }
        Ok(count)
    }

    fn peek(&self) -> Option<&PendingFrame> {
        self.queue.peek()
    }

    fn pop(&mut self) -> Option<PendingFrame> {
        self.queue.pop()
    }
}

struct Partial {
    can_id: u32,
    transfer_id: u8,
    data: Vec<u8>,
}

pub struct MessageRx {
    subjects: Vec<SubjectId>,
    partial: Option<Partial>,
}

impl MessageRx {
    pub fn new(subjects: &[SubjectId]) -> Self {
        Self {
            subjects: subjects.to_vec(),
            partial: None,
        }
    }
}

impl RxEngine for MessageRx {
    fn accept(&mut self, arena: &mut Arena, frame: &GenericFrame) -> Accepted {
        let can_id = frame.can_id;
        let is_service = can_id & (1 << 25) != 0;
        let subject = SubjectId::from_u16_truncating((can_id >> 8) as u16);
        if is_service || !self.subjects.contains(&subject) {
            return Accepted::Rejected;
        }
        let Some((&tail, data)) = frame.payload.split_last() else {
            return Accepted::Rejected;
        };
        let transfer_id = tail & 0x1f;

        if tail & SOT != 0 {
            self.partial = Some(Partial {
                can_id,
                transfer_id,
                data: data.to_vec(),
            });
        } else {
            match self.partial.as_mut() {
                Some(partial) if partial.can_id == can_id && partial.transfer_id == transfer_id => {
                    partial.data.extend_from_slice(data)
                }
                _ => return Accepted::Rejected,
            }
        }

        if tail & EOT == 0 {
            return Accepted::Consumed;
        }
        let Some(partial) = self.partial.take() else {
            return Accepted::Rejected;
        };
        let Ok(payload) = arena.store(&partial.data) else {
            return Accepted::Rejected;
        };
        Accepted::Complete(CompletedTransfer {
            meta: TransferMeta {
                kind: TransferKind::Message,
                port: subject.into(),
                source: NodeId::new((can_id & 0x7f) as u8),
                destination: None,
                transfer_id: TransferId::from_u8_truncating(transfer_id),
                priority: Priority::from_u8_truncating((can_id >> 26) as u8),
                timestamp: frame.timestamp,
            },
            payload,
        })
    }
}

pub const HEARTBEAT_SUBJECT: SubjectId = SubjectId::new(7509).unwrap();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub uptime: u32,
    pub health: u8,
    pub mode: u8,
    pub vendor_specific_status_code: u8,
}

pub struct HeartbeatCodec;

impl Codec for HeartbeatCodec {
    type Message = Heartbeat;
    const EXTENT: usize = 12;

    fn serialize(&self, message: &Heartbeat, buffer: &mut [u8]) -> Result<usize, CodecError> {
        let buffer = buffer.get_mut(..7).ok_or(CodecError::BufferTooSmall)?;
        buffer[..4].copy_from_slice(&message.uptime.to_le_bytes());
        buffer[4] = message.health & 0x03;
        buffer[5] = message.mode & 0x07;
        buffer[6] = message.vendor_specific_status_code;
        Ok(7)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Heartbeat, CodecError> {
        let bytes = bytes.get(..7).ok_or(CodecError::Malformed)?;
        Ok(Heartbeat {
            uptime: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            health: bytes[4] & 0x03,
            mode: bytes[5] & 0x07,
            vendor_specific_status_code: bytes[6],
        })
    }
}

/// Length-prefixed byte string of up to 255 bytes
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Message = Vec<u8>;
    const EXTENT: usize = 256;

    fn serialize(&self, message: &Vec<u8>, buffer: &mut [u8]) -> Result<usize, CodecError> {
        let length = u8::try_from(message.len()).map_err(|_| CodecError::BufferTooSmall)?;
        let size = message.len() + 1;
        let buffer = buffer.get_mut(..size).ok_or(CodecError::BufferTooSmall)?;
        buffer[0] = length;
        buffer[1..].copy_from_slice(message);
        Ok(size)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        let (&length, rest) = bytes.split_first().ok_or(CodecError::Malformed)?;
        let data = rest.get(..usize::from(length)).ok_or(CodecError::Malformed)?;
        Ok(data.to_vec())
    }
}

pub fn heartbeat_meta(source: NodeId, transfer_id: u8) -> TransferMeta {
    TransferMeta {
        kind: TransferKind::Message,
        port: HEARTBEAT_SUBJECT.into(),
        source: Some(source),
        destination: None,
        transfer_id: TransferId::from_u8_truncating(transfer_id),
        priority: Priority::Nominal,
        timestamp: None,
    }
}
