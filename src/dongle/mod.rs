//! WiFi relay ("dongle") binary protocol: framed packets over a persistent
//! TCP socket, strictly half-duplex.

pub mod decoder;
pub mod packet;
pub mod transport;

pub use decoder::PacketDecoder;
pub use packet::{DongleFunction, Heartbeat, Packet, TcpFrameFactory, TcpFunction, TranslatedData};
pub use transport::DongleTransport;
