use crate::data::{
    BatteryBankData, InverterEnergyData, InverterRuntimeData, MidboxRuntimeData, Serial,
};
use crate::dongle::packet::{
    exception_description, DongleFunction, Packet, TcpFrameFactory, TranslatedData,
};
use crate::dongle::PacketDecoder;
use crate::error::{Error, Result};
use crate::registers::{ModelFamily, RegisterWindow};
use crate::transport::{Transport, TransportCapabilities, DONGLE_CAPABILITIES};

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::codec::FramedRead;

/// Register groups are organized in blocks of 40; a single read must not
/// cross a block boundary.
pub const BLOCK_SIZE: u16 = 40;

pub const DEFAULT_PORT: u16 = 8000;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The half-duplex link as a tiny state machine: one request in flight,
/// never more.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LinkState {
    Idle,
    AwaitingResponse,
    Parsing,
}

struct Link {
    reader: FramedRead<OwnedReadHalf, PacketDecoder>,
    writer: OwnedWriteHalf,
}

/// Transport over the WiFi relay's proprietary framed protocol.
///
/// The channel is strictly half-duplex and the relay firmware needs a
/// settling delay between consecutive register-group reads; requests are
/// serialized and paced here, never pipelined.
pub struct DongleTransport {
    host: String,
    port: u16,
    dongle: Serial,
    inverter: Serial,
    family: ModelFamily,
    rated_power_w: Option<f64>,
    read_timeout: Duration,
    inter_group_delay: Duration,
    link: Option<Link>,
    state: LinkState,
    last_exchange: Option<Instant>,
}

impl DongleTransport {
    pub fn new(host: impl Into<String>, port: u16, dongle: Serial, inverter: Serial) -> Self {
        Self {
            host: host.into(),
            port,
            dongle,
            inverter,
            family: ModelFamily::Unknown,
            rated_power_w: None,
            read_timeout: Duration::from_secs(10),
            inter_group_delay: Duration::from_millis(250),
            link: None,
            state: LinkState::Idle,
            last_exchange: None,
        }
    }

    pub fn from_config(config: &crate::config::TransportConfig) -> Result<Self> {
        config.validate()?;
        if config.transport_type() != crate::config::TransportType::WifiDongle {
            return Err(Error::connection(format!(
                "transport type {:?} is not a dongle channel",
                config.transport_type()
            )));
        }
        let mut transport = Self::new(
            config.host(),
            config.port(),
            config.dongle_serial().unwrap_or_default(),
            config.serial().unwrap_or_default(),
        );
        transport.rated_power_w = config.rated_power_w();
        transport.read_timeout = config.read_timeout();
        transport.inter_group_delay = config.delay();
        Ok(transport)
    }

    pub fn set_family(&mut self, family: ModelFamily) {
        self.family = family;
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    pub fn set_rated_power_w(&mut self, rated: Option<f64>) {
        self.rated_power_w = rated;
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    pub fn set_inter_group_delay(&mut self, delay: Duration) {
        self.inter_group_delay = delay;
    }

    /// Sleep out the remainder of the settling window since the last
    /// exchange. Throttling, not mutual exclusion.
    async fn settle(&mut self) {
        if let Some(last) = self.last_exchange {
            let elapsed = last.elapsed();
            if elapsed < self.inter_group_delay {
                sleep(self.inter_group_delay - elapsed).await;
            }
        }
    }

    /// One request/response exchange. Exactly one may be outstanding.
    async fn request(&mut self, request: TranslatedData) -> Result<TranslatedData> {
        if self.link.is_none() {
            return Err(Error::connection("dongle transport is not connected"));
        }
        if self.state != LinkState::Idle {
            return Err(Error::read(format!(
                "request for register {} while the link is {:?}",
                request.register, self.state
            )));
        }

        self.settle().await;

        let frame = TcpFrameFactory::build(&Packet::TranslatedData(request.clone()));
        {
            let Some(link) = self.link.as_mut() else {
                return Err(Error::connection("dongle transport is not connected"));
            };
            if let Err(e) = link.writer.write_all(&frame).await {
                self.link = None;
                self.state = LinkState::Idle;
                return Err(Error::connection(format!("socket write failed: {e}")));
            }
        }
        self.state = LinkState::AwaitingResponse;

        let deadline = Instant::now() + self.read_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.state = LinkState::Idle;
                return Err(Error::timeout(format!(
                    "no response for register {} within {:?}",
                    request.register, self.read_timeout
                )));
            }

            let Some(link) = self.link.as_mut() else {
                self.state = LinkState::Idle;
                return Err(Error::connection("connection lost mid-request"));
            };
            let next = match timeout(remaining, link.reader.next()).await {
                Ok(next) => next,
                Err(_) => {
                    self.state = LinkState::Idle;
                    return Err(Error::timeout(format!(
                        "no response for register {} within {:?}",
                        request.register, self.read_timeout
                    )));
                }
            };

            match next {
                None => {
                    self.link = None;
                    self.state = LinkState::Idle;
                    return Err(Error::connection("connection closed by relay"));
                }
                Some(Err(e @ Error::ConnectionError(_))) => {
                    self.link = None;
                    self.state = LinkState::Idle;
                    return Err(e);
                }
                Some(Err(e)) => {
                    self.state = LinkState::Idle;
                    return Err(e);
                }
                Some(Ok(Packet::Heartbeat(hb))) => {
                    debug!("heartbeat from dongle {}", hb.dongle);
                }
                Some(Ok(Packet::TranslatedData(reply))) => {
                    self.state = LinkState::Parsing;
                    if reply.register != request.register
                        || reply.device_function != request.device_function
                    {
                        debug!(
                            "stale reply for register {} while awaiting {}",
                            reply.register, request.register
                        );
                        self.state = LinkState::AwaitingResponse;
                        continue;
                    }

                    self.state = LinkState::Idle;
                    self.last_exchange = Some(Instant::now());

                    if let Some(code) = reply.exception {
                        let message = format!(
                            "device exception {code} ({}) for register {}",
                            exception_description(code),
                            reply.register
                        );
                        return Err(match request.device_function {
                            DongleFunction::WriteSingle => Error::write(message),
                            _ => Error::read(message),
                        });
                    }
                    return Ok(reply);
                }
            }
        }
    }

    async fn read_group(
        &mut self,
        function: DongleFunction,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        validate_block_boundary(start, count)?;
        let request = TranslatedData::read_request(
            function,
            self.dongle,
            self.inverter,
            start,
            count as u8,
        );
        let reply = self.request(request).await?;
        let values = reply.register_values();
        if values.len() != count as usize {
            return Err(Error::read(format!(
                "asked for {count} registers at {start}, relay returned {}",
                values.len()
            )));
        }
        Ok(values)
    }

    /// Read an arbitrary window, splitting on block boundaries with the
    /// settling delay between groups.
    async fn read_window(
        &mut self,
        function: DongleFunction,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        let mut values = Vec::with_capacity(count as usize);
        let mut cursor = start;
        let mut remaining = count;
        while remaining > 0 {
            let chunk = remaining.min(BLOCK_SIZE - (cursor % BLOCK_SIZE));
            values.extend(self.read_group(function, cursor, chunk).await?);
            cursor += chunk;
            remaining -= chunk;
        }
        Ok(values)
    }
}

/// Reads must stay inside one 40-register block; the relay rejects
/// anything that straddles a boundary.
pub fn validate_block_boundary(register: u16, count: u16) -> Result<()> {
    if count == 0 || count > BLOCK_SIZE {
        return Err(Error::read(format!("register count {count} out of range")));
    }
    let start_block = register / BLOCK_SIZE;
    let end_block = (register + count - 1) / BLOCK_SIZE;
    if start_block != end_block {
        return Err(Error::read(format!(
            "read of {count} registers at {register} crosses block {start_block}/{end_block} boundary"
        )));
    }
    Ok(())
}

#[async_trait]
impl Transport for DongleTransport {
    async fn connect(&mut self) -> Result<()> {
        self.link = None;
        self.state = LinkState::Idle;

        let addr = (self.host.clone(), self.port);
        let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(Error::connection(format!(
                    "failed to connect to dongle {}:{}: {e}",
                    self.host, self.port
                )))
            }
            Err(_) => {
                return Err(Error::connection(format!(
                    "connection to dongle {}:{} timed out",
                    self.host, self.port
                )))
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("failed to set TCP_NODELAY: {e}");
        }

        let (reader, writer) = stream.into_split();
        self.link = Some(Link {
            reader: FramedRead::new(reader, PacketDecoder::new()),
            writer,
        });
        info!(
            "dongle {} connected at {}:{}",
            self.dongle, self.host, self.port
        );
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.link.take().is_some() {
            info!("dongle {} disconnected", self.dongle);
        }
        self.state = LinkState::Idle;
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    fn capabilities(&self) -> &'static TransportCapabilities {
        &DONGLE_CAPABILITIES
    }

    async fn read_runtime(&mut self) -> Result<Option<InverterRuntimeData>> {
        let Some(map) = self.family.runtime_map() else {
            return Ok(None);
        };
        let values = self
            .read_group(DongleFunction::ReadInput, 0, BLOCK_SIZE)
            .await?;
        let window = RegisterWindow::new(0, &values);
        let mut data = map.decode(self.inverter, &window);
        data.rated_power_w = self.rated_power_w;
        Ok(Some(data))
    }

    async fn read_energy(&mut self) -> Result<Option<InverterEnergyData>> {
        let Some(map) = self.family.energy_map() else {
            return Ok(None);
        };
        let values = self
            .read_group(DongleFunction::ReadInput, BLOCK_SIZE, BLOCK_SIZE)
            .await?;
        let window = RegisterWindow::new(BLOCK_SIZE, &values);
        Ok(Some(map.decode(self.inverter, &window)))
    }

    async fn read_battery(&mut self) -> Result<Option<BatteryBankData>> {
        let Some(map) = self.family.battery_map() else {
            return Ok(None);
        };

        // aggregate block first; it tells us how many module slots follow
        let mut values = self
            .read_group(DongleFunction::ReadInput, 80, BLOCK_SIZE)
            .await?;
        let count = {
            let window = RegisterWindow::new(80, &values);
            window
                .raw_or_default(map.module_count.as_ref())
                .min(crate::registers::MAX_MODULE_SLOTS)
        };

        let needed_end = map.module_base + count * map.module_stride;
        let mut have_end = 80 + BLOCK_SIZE;
        while have_end < needed_end {
            values.extend(
                self.read_group(DongleFunction::ReadInput, have_end, BLOCK_SIZE)
                    .await?,
            );
            have_end += BLOCK_SIZE;
        }

        let window = RegisterWindow::new(80, &values);
        Ok(Some(map.decode(self.inverter, &window)))
    }

    async fn read_midbox(&mut self) -> Result<Option<MidboxRuntimeData>> {
        let Some(map) = self.family.midbox_map() else {
            return Ok(None);
        };
        let values = self
            .read_group(DongleFunction::ReadInput, 0, BLOCK_SIZE)
            .await?;
        let window = RegisterWindow::new(0, &values);
        Ok(Some(map.decode(self.inverter, &window)))
    }

    async fn read_parameters(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        self.read_window(DongleFunction::ReadHold, start, count).await
    }

    async fn write_parameters(&mut self, values: &HashMap<u16, u16>) -> Result<()> {
        let mut writes: Vec<(u16, u16)> = values.iter().map(|(k, v)| (*k, *v)).collect();
        writes.sort_unstable();

        for (register, value) in writes {
            let request =
                TranslatedData::write_single(self.dongle, self.inverter, register, value);
            let reply = self.request(request).await?;
            let echoed = reply.register_values().first().copied();
            if echoed != Some(value) {
                return Err(Error::write(format!(
                    "register {register}: wrote {value}, relay echoed {echoed:?}"
                )));
            }
        }
        Ok(())
    }
}
