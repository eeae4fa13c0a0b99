use crate::frame::*;
use crate::FrameError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const FRAME_OPEN: u8 = 0x10;
const FRAME_BEGIN: u8 = 0x11;
const FRAME_ATTACH: u8 = 0x12;
const FRAME_FLOW: u8 = 0x13;
const FRAME_TRANSFER: u8 = 0x14;
const FRAME_DETACH: u8 = 0x16;
const FRAME_END: u8 = 0x17;
const FRAME_CLOSE: u8 = 0x18;
const FRAME_HEADER: u8 = 0x41;

/// The 8 byte protocol header both endpoints exchange before any frame.
pub const PROTOCOL_HEADER: [u8; 8] = [b'A', b'M', b'Q', b'P', 0x00, 0x01, 0x00, 0x00];

/// Encoder and decoder of [`Frame`] values.
///
/// Every frame except the protocol header is laid out as a type tag byte, a
/// channel word and a payload length followed by the payload itself.
#[derive(Default)]
pub struct FrameCodec {}

impl Encoder<Frame> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, frame: Frame, buf: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(buf, frame);

        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() || !is_full_frame(src) {
            return Ok(None);
        }

        if src[0] == FRAME_HEADER {
            let mut head = [0u8; 8];
            src.copy_to_slice(&mut head);

            if head != PROTOCOL_HEADER {
                return Err(FrameError::new("bad protocol header").into());
            }

            return Ok(Some(Frame::Header));
        }

        let tag = src.get_u8();
        let channel = src.get_u16();
        let payload_len = src.get_u32() as usize;
        let mut payload = src.split_to(payload_len);

        let frame = decode_payload(tag, channel, &mut payload)?;

        Ok(Some(frame))
    }
}

/// Check if the buffer contains a full frame. Cheap since the fixed part of
/// every frame carries the payload length.
fn is_full_frame(src: &BytesMut) -> bool {
    if src[0] == FRAME_HEADER {
        return src.len() >= 8;
    }

    if src.len() < 7 {
        return false;
    }

    let payload_len = u32::from_be_bytes([src[3], src[4], src[5], src[6]]) as usize;

    src.len() >= 7 + payload_len
}

fn encode_frame(buf: &mut BytesMut, frame: Frame) {
    if let Frame::Header = frame {
        buf.put_slice(&PROTOCOL_HEADER);

        return;
    }

    let channel = frame.channel();
    let mut payload = BytesMut::new();

    let tag = match frame {
        Frame::Header => unreachable!(),
        Frame::Open { container_id } => {
            put_string(&mut payload, &container_id);

            FRAME_OPEN
        }
        Frame::Begin { .. } => FRAME_BEGIN,
        Frame::Attach(args) => {
            payload.put_u32(args.handle);
            put_string(&mut payload, &args.name);
            payload.put_u8(match args.role {
                Role::Sender => 0,
                Role::Receiver => 1,
            });
            put_string(&mut payload, &args.source_address);
            payload.put_u8(args.source_dynamic as u8);
            put_string(&mut payload, &args.target_address);

            FRAME_ATTACH
        }
        Frame::Flow { handle, credit, .. } => {
            payload.put_u32(handle);
            payload.put_u32(credit);

            FRAME_FLOW
        }
        Frame::Transfer { handle, message, .. } => {
            payload.put_u32(handle);
            payload.put_slice(&message.body);

            FRAME_TRANSFER
        }
        Frame::Detach { handle, error, .. } => {
            payload.put_u32(handle);
            put_condition(&mut payload, &error);

            FRAME_DETACH
        }
        Frame::End { error, .. } => {
            put_condition(&mut payload, &error);

            FRAME_END
        }
        Frame::Close { error } => {
            put_condition(&mut payload, &error);

            FRAME_CLOSE
        }
    };

    buf.put_u8(tag);
    buf.put_u16(channel);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(&payload);
}

fn decode_payload(tag: u8, channel: u16, payload: &mut BytesMut) -> Result<Frame, FrameError> {
    let frame = match tag {
        FRAME_OPEN => Frame::Open {
            container_id: get_string(payload)?,
        },
        FRAME_BEGIN => Frame::Begin { channel },
        FRAME_ATTACH => {
            let handle = get_u32(payload)?;
            let name = get_string(payload)?;
            let role = match get_u8(payload)? {
                0 => Role::Sender,
                1 => Role::Receiver,
                r => return Err(FrameError::new(format!("unknown role {r}"))),
            };
            let source_address = get_string(payload)?;
            let source_dynamic = get_u8(payload)? != 0;
            let target_address = get_string(payload)?;

            Frame::Attach(AttachArgs {
                channel,
                handle,
                name,
                role,
                source_address,
                source_dynamic,
                target_address,
            })
        }
        FRAME_FLOW => Frame::Flow {
            channel,
            handle: get_u32(payload)?,
            credit: get_u32(payload)?,
        },
        FRAME_TRANSFER => {
            let handle = get_u32(payload)?;
            let body = payload.split().to_vec();

            Frame::Transfer {
                channel,
                handle,
                message: Message::new(body),
            }
        }
        FRAME_DETACH => Frame::Detach {
            channel,
            handle: get_u32(payload)?,
            error: get_condition(payload)?,
        },
        FRAME_END => Frame::End {
            channel,
            error: get_condition(payload)?,
        },
        FRAME_CLOSE => Frame::Close {
            error: get_condition(payload)?,
        },
        t => return Err(FrameError::new(format!("unknown frame tag {t:#04x}"))),
    };

    Ok(frame)
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn put_condition(buf: &mut BytesMut, c: &ErrorCondition) {
    put_string(buf, c.name());
    put_string(buf, c.description());
}

fn get_condition(buf: &mut BytesMut) -> Result<ErrorCondition, FrameError> {
    let name = get_string(buf)?;
    let description = get_string(buf)?;

    Ok(ErrorCondition::new(name, description))
}

fn get_u8(buf: &mut BytesMut) -> Result<u8, FrameError> {
    if buf.is_empty() {
        return Err(FrameError::new("short frame"));
    }

    Ok(buf.get_u8())
}

fn get_u32(buf: &mut BytesMut) -> Result<u32, FrameError> {
    if buf.len() < 4 {
        return Err(FrameError::new("short frame"));
    }

    Ok(buf.get_u32())
}

fn get_string(buf: &mut BytesMut) -> Result<String, FrameError> {
    if buf.len() < 2 {
        return Err(FrameError::new("short frame"));
    }

    let len = buf.get_u16() as usize;
    if buf.len() < len {
        return Err(FrameError::new("short frame"));
    }

    let bytes = buf.split_to(len);

    String::from_utf8(bytes.to_vec()).map_err(|_| FrameError::new("string is not utf8"))
}
