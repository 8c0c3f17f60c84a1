//! Common imports for transport implementations and their callers.

pub use crate::config::{TransportConfig, TransportType};
pub use crate::data::Serial;
pub use crate::error::{Error, Result};
pub use crate::transport::{Transport, TransportCapabilities};

pub use log::{debug, error, info, trace, warn};
