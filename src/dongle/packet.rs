use crate::data::Serial;
use crate::error::{Error, Result};

use enum_dispatch::enum_dispatch;
use nom::bytes::complete::take;
use nom::number::complete::{le_u16, u8 as take_u8};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Every frame starts with this two-byte prefix. The relay is allowed to
/// prepend noise, so decoders scan for it before trusting any length field.
pub const MAGIC: [u8; 2] = [0xa1, 0x1a];

pub const PROTOCOL_VERSION: u16 = 2;

/// Fixed header size: magic(2) + protocol(2) + frame length(2) + address(1)
/// + function class(1) + dongle serial(10) + payload length(2).
pub const HEADER_LEN: usize = 20;

/// The frame-length field counts everything after itself: address byte
/// through CRC. A frame with an empty payload is exactly this long.
pub const FRAME_OVERHEAD: u16 = 16;

/// Sanity cap on the frame-length field; nothing the relay sends is bigger.
pub const MAX_FRAME_LEN: u16 = 1024;

const ADDRESS_CLIENT: u8 = 1;
const ACTION_REQUEST: u8 = 0;
const EXCEPTION_FLAG: u8 = 0x80;

/// CRC16, Modbus polynomial, reflected, init 0xFFFF.
pub fn checksum(data: &[u8]) -> u16 {
    crc16::State::<crc16::MODBUS>::calculate(data)
}

// TcpFunction {{{
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum TcpFunction {
    Heartbeat = 193,
    TranslatedData = 194,
}
// }}}

// DongleFunction {{{
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum DongleFunction {
    ReadHold = 3,
    ReadInput = 4,
    WriteSingle = 6,
}
// }}}

/// Human text for the Modbus exception codes devices actually raise.
pub fn exception_description(code: u8) -> &'static str {
    match code {
        1 => "illegal function",
        2 => "illegal data address",
        3 => "illegal data value",
        4 => "device failure",
        _ => "unknown exception",
    }
}

#[enum_dispatch]
pub trait PacketCommon {
    fn dongle(&self) -> Serial;
    fn set_dongle(&mut self, dongle: Serial);
    fn tcp_function(&self) -> TcpFunction;
    fn payload_bytes(&self) -> Vec<u8>;
}

#[enum_dispatch(PacketCommon)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Packet {
    Heartbeat(Heartbeat),
    TranslatedData(TranslatedData),
}

// Heartbeat {{{
/// Keepalive the relay emits on its own schedule; carries only the dongle
/// serial and an empty payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Heartbeat {
    pub dongle: Serial,
}

impl PacketCommon for Heartbeat {
    fn dongle(&self) -> Serial {
        self.dongle
    }
    fn set_dongle(&mut self, dongle: Serial) {
        self.dongle = dongle;
    }
    fn tcp_function(&self) -> TcpFunction {
        TcpFunction::Heartbeat
    }
    fn payload_bytes(&self) -> Vec<u8> {
        Vec::new()
    }
}
// }}}

// TranslatedData {{{
/// A register transaction relayed to one inverter behind the dongle.
///
/// Payload layout: action(1) | modbus function(1) | inverter serial(10) |
/// start register(2 LE) | body. Read requests put the register count in the
/// body; read responses carry the count then 16-bit LE values; single writes
/// carry the 2-byte value. An exception response sets the function's high
/// bit and carries one exception-code byte.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TranslatedData {
    pub dongle: Serial,
    pub device_function: DongleFunction,
    pub inverter: Serial,
    pub register: u16,
    pub register_count: u8,
    pub values: Vec<u8>,
    /// Exception code when the device rejected the transaction.
    pub exception: Option<u8>,
}

impl TranslatedData {
    pub fn read_request(
        function: DongleFunction,
        dongle: Serial,
        inverter: Serial,
        register: u16,
        count: u8,
    ) -> Self {
        Self {
            dongle,
            device_function: function,
            inverter,
            register,
            register_count: count,
            values: Vec::new(),
            exception: None,
        }
    }

    pub fn write_single(dongle: Serial, inverter: Serial, register: u16, value: u16) -> Self {
        Self {
            dongle,
            device_function: DongleFunction::WriteSingle,
            inverter,
            register,
            register_count: 1,
            values: value.to_le_bytes().to_vec(),
            exception: None,
        }
    }

    /// (register, value) pairs carried in the body.
    pub fn pairs(&self) -> Vec<(u16, u16)> {
        self.values
            .chunks(2)
            .enumerate()
            .map(|(pos, chunk)| {
                (
                    self.register + pos as u16,
                    crate::scaling::u16ify(chunk, 0),
                )
            })
            .collect()
    }

    pub fn register_values(&self) -> Vec<u16> {
        self.pairs().into_iter().map(|(_, v)| v).collect()
    }

    pub fn decode(payload: &[u8], dongle: Serial) -> Result<Self> {
        let (rest, (_action, function_byte, inverter_bytes, register)) = payload_header(payload)
            .map_err(|_| Error::read("translated data payload too short"))?;
        let inverter = Serial::try_from(inverter_bytes)?;

        if function_byte & EXCEPTION_FLAG != 0 {
            let device_function = DongleFunction::try_from(function_byte & !EXCEPTION_FLAG)
                .map_err(|_| {
                    Error::read(format!("exception for unknown function {function_byte:#04x}"))
                })?;
            let code = *rest
                .first()
                .ok_or_else(|| Error::read("exception frame without code byte"))?;
            return Ok(Self {
                dongle,
                device_function,
                inverter,
                register,
                register_count: 0,
                values: Vec::new(),
                exception: Some(code),
            });
        }

        let device_function = DongleFunction::try_from(function_byte)
            .map_err(|_| Error::read(format!("unknown device function {function_byte:#04x}")))?;

        match device_function {
            DongleFunction::ReadHold | DongleFunction::ReadInput => {
                let count = *rest
                    .first()
                    .ok_or_else(|| Error::read("read response without count byte"))?;
                let values = rest[1..].to_vec();
                if values.len() != usize::from(count) * 2 {
                    return Err(Error::read(format!(
                        "read response count mismatch: count byte {} but {} value bytes",
                        count,
                        values.len()
                    )));
                }
                Ok(Self {
                    dongle,
                    device_function,
                    inverter,
                    register,
                    register_count: count,
                    values,
                    exception: None,
                })
            }
            DongleFunction::WriteSingle => {
                if rest.len() != 2 {
                    return Err(Error::read(format!(
                        "write response carries {} bytes, expected 2",
                        rest.len()
                    )));
                }
                Ok(Self {
                    dongle,
                    device_function,
                    inverter,
                    register,
                    register_count: 1,
                    values: rest.to_vec(),
                    exception: None,
                })
            }
        }
    }
}

fn payload_header(input: &[u8]) -> nom::IResult<&[u8], (u8, u8, &[u8], u16)> {
    let (rest, action) = take_u8(input)?;
    let (rest, function) = take_u8(rest)?;
    let (rest, inverter) = take(10usize)(rest)?;
    let (rest, register) = le_u16(rest)?;
    Ok((rest, (action, function, inverter, register)))
}

impl PacketCommon for TranslatedData {
    fn dongle(&self) -> Serial {
        self.dongle
    }
    fn set_dongle(&mut self, dongle: Serial) {
        self.dongle = dongle;
    }
    fn tcp_function(&self) -> TcpFunction {
        TcpFunction::TranslatedData
    }

    fn payload_bytes(&self) -> Vec<u8> {
        let mut p = Vec::with_capacity(14 + self.values.len() + 1);
        p.push(ACTION_REQUEST);
        p.push(self.device_function.into());
        p.extend_from_slice(&self.inverter.data());
        p.extend_from_slice(&self.register.to_le_bytes());
        match self.device_function {
            DongleFunction::ReadHold | DongleFunction::ReadInput => {
                p.push(self.register_count);
                p.extend_from_slice(&self.values);
            }
            DongleFunction::WriteSingle => {
                p.extend_from_slice(&self.values);
            }
        }
        p
    }
}
// }}}

// TcpFrameFactory {{{
pub struct TcpFrameFactory;

impl TcpFrameFactory {
    pub fn build(packet: &Packet) -> Vec<u8> {
        let payload = packet.payload_bytes();
        let frame_len = FRAME_OVERHEAD + payload.len() as u16;

        let mut r = Vec::with_capacity(6 + frame_len as usize);
        r.extend_from_slice(&MAGIC);
        r.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
        r.extend_from_slice(&frame_len.to_le_bytes());
        r.push(ADDRESS_CLIENT);
        r.push(packet.tcp_function() as u8);
        r.extend_from_slice(&packet.dongle().data());
        r.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        r.extend_from_slice(&payload);
        r.extend_from_slice(&checksum(&payload).to_le_bytes());

        r
    }
}
// }}}
