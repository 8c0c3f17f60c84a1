//! Local/cloud failover orchestrator.
//!
//! Composes one local transport (dongle or Modbus) and one cloud transport
//! behind the same `Transport` surface. Local is preferred while healthy;
//! any local failure routes that call to the cloud and starts the local
//! retry clock. Recovery is time-based, not success-based: a lucky local
//! packet does not clear the failure marker, which keeps a flaky link from
//! flapping between channels.

use crate::data::{
    BatteryBankData, InverterEnergyData, InverterRuntimeData, MidboxRuntimeData,
};
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportCapabilities, HYBRID_CAPABILITIES};

use async_trait::async_trait;
use log::{info, warn};
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_LOCAL_RETRY_INTERVAL: Duration = Duration::from_secs(60);

pub struct HybridTransport {
    local: Box<dyn Transport>,
    cloud: Box<dyn Transport>,
    using_local: bool,
    local_failed_at: Option<Instant>,
    local_retry_interval: Duration,
    connected: bool,
}

/// Route one operation local-first with cloud fallback.
///
/// A macro rather than a closure-taking helper: the operation borrows
/// `&mut self.local` and `&mut self.cloud` in turn, which a generic `FnMut`
/// cannot express.
macro_rules! with_failover {
    ($self:ident, $method:ident $args:tt) => {{
        if $self.should_try_local() && $self.ensure_local_connected().await {
            match $self.local.$method $args.await {
                Ok(value) => Ok(value),
                Err(e) => {
                    $self.note_local_failure(stringify!($method), &e);
                    $self.cloud.$method $args.await
                }
            }
        } else {
            $self.cloud.$method $args.await
        }
    }};
}

impl HybridTransport {
    pub fn new(local: Box<dyn Transport>, cloud: Box<dyn Transport>) -> Self {
        Self {
            local,
            cloud,
            using_local: false,
            local_failed_at: None,
            local_retry_interval: DEFAULT_LOCAL_RETRY_INTERVAL,
            connected: false,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.local_retry_interval = interval;
        self
    }

    pub fn using_local(&self) -> bool {
        self.using_local
    }

    pub fn local_failed_at(&self) -> Option<Instant> {
        self.local_failed_at
    }

    /// Local is attempted while it has never failed, or once the retry
    /// interval has elapsed since the last failure (re-arming).
    fn should_try_local(&self) -> bool {
        match self.local_failed_at {
            None => self.using_local,
            Some(failed_at) => failed_at.elapsed() > self.local_retry_interval,
        }
    }

    fn note_local_failure(&mut self, operation: &str, error: &Error) {
        warn!("local {operation} failed, falling back to cloud: {error}");
        self.using_local = false;
        self.local_failed_at = Some(Instant::now());
    }

    /// A re-armed local channel may have lost its socket along the way;
    /// reconnect it before use. A failed reconnect counts as a failure.
    async fn ensure_local_connected(&mut self) -> bool {
        if self.local.is_connected() {
            return true;
        }
        match self.local.connect().await {
            Ok(()) => {
                info!("local transport reconnected");
                true
            }
            Err(e) => {
                self.note_local_failure("reconnect", &e);
                false
            }
        }
    }
}

#[async_trait]
impl Transport for HybridTransport {
    /// Cloud connects first and its failure is fatal: there is nothing left
    /// to fall back to. A local failure is non-fatal and only starts the
    /// retry clock.
    async fn connect(&mut self) -> Result<()> {
        self.connected = false;
        self.using_local = false;

        self.cloud.connect().await?;

        match self.local.connect().await {
            Ok(()) => {
                self.using_local = true;
                self.local_failed_at = None;
            }
            Err(e) => {
                warn!("local transport unavailable at connect: {e}");
                self.using_local = false;
                self.local_failed_at = Some(Instant::now());
            }
        }

        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.local.disconnect().await;
        self.cloud.disconnect().await;
        self.connected = false;
        self.using_local = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn capabilities(&self) -> &'static TransportCapabilities {
        &HYBRID_CAPABILITIES
    }

    async fn read_runtime(&mut self) -> Result<Option<InverterRuntimeData>> {
        with_failover!(self, read_runtime())
    }

    async fn read_energy(&mut self) -> Result<Option<InverterEnergyData>> {
        with_failover!(self, read_energy())
    }

    async fn read_battery(&mut self) -> Result<Option<BatteryBankData>> {
        with_failover!(self, read_battery())
    }

    async fn read_midbox(&mut self) -> Result<Option<MidboxRuntimeData>> {
        with_failover!(self, read_midbox())
    }

    async fn read_parameters(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        with_failover!(self, read_parameters(start, count))
    }

    async fn write_parameters(&mut self, values: &HashMap<u16, u16>) -> Result<()> {
        with_failover!(self, write_parameters(values))
    }
}
