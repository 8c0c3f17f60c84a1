use crate::data::Serial;
use crate::dongle::packet::{
    self, Heartbeat, Packet, TcpFunction, TranslatedData, FRAME_OVERHEAD, HEADER_LEN, MAGIC,
    MAX_FRAME_LEN,
};
use crate::error::Error;
use crate::scaling;

use bytes::{Buf, BytesMut};
use log::{debug, warn};
use tokio_util::codec::Decoder;

/// Extracts dongle frames from the TCP byte stream.
///
/// The relay may prepend noise before a frame, so the decoder scans forward
/// to the magic prefix and only then trusts the length fields. Structural
/// damage (short frame, inconsistent lengths, CRC mismatch) consumes the
/// offending bytes so the stream can resync, and surfaces as `ReadError`.
#[derive(Default)]
pub struct PacketDecoder;

impl PacketDecoder {
    pub fn new() -> Self {
        Self
    }
}

fn find_magic(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == MAGIC)
}

impl Decoder for PacketDecoder {
    type Item = Packet;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, Error> {
        let Some(pos) = find_magic(src) else {
            // keep one trailing byte, it may be half a magic prefix
            if src.len() > 1 {
                let junk = src.len() - 1;
                debug!("discarding {junk} bytes with no frame prefix");
                src.advance(junk);
            }
            return Ok(None);
        };

        if pos > 0 {
            warn!("discarding {pos} bytes of noise before frame prefix");
            src.advance(pos);
        }

        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let frame_len = scaling::u16ify(src, 4);
        if frame_len < FRAME_OVERHEAD || frame_len > MAX_FRAME_LEN {
            // resync past this magic so the next scan can recover
            src.advance(2);
            return Err(Error::read(format!(
                "frame length {frame_len} outside [{FRAME_OVERHEAD}, {MAX_FRAME_LEN}]"
            )));
        }

        let total = 6 + frame_len as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total);
        parse_frame(&frame).map(Some)
    }
}

fn parse_frame(frame: &[u8]) -> Result<Packet, Error> {
    let dongle = Serial::try_from(&frame[8..18])?;

    let payload_len = scaling::u16ify(frame, 18) as usize;
    if HEADER_LEN + payload_len + 2 != frame.len() {
        return Err(Error::read(format!(
            "payload length {} disagrees with frame length {}",
            payload_len,
            frame.len()
        )));
    }

    let payload = &frame[HEADER_LEN..HEADER_LEN + payload_len];
    let crc = scaling::u16ify(frame, frame.len() - 2);
    let expected = packet::checksum(payload);
    if crc != expected {
        return Err(Error::read(format!(
            "crc mismatch: frame carries {crc:#06x}, computed {expected:#06x}"
        )));
    }

    match TcpFunction::try_from(frame[7]) {
        Ok(TcpFunction::Heartbeat) => Ok(Packet::Heartbeat(Heartbeat { dongle })),
        Ok(TcpFunction::TranslatedData) => {
            Ok(Packet::TranslatedData(TranslatedData::decode(payload, dongle)?))
        }
        Err(_) => Err(Error::read(format!(
            "unknown tcp function {:#04x}",
            frame[7]
        ))),
    }
}
