//! # Voltage Xcom - Studer Xcom Protocol Client
//!
//! **Author:** Evan Liu <liuyifanz.1996@gmail.com>
//! **License:** MIT
//!
//! An async client for the Studer Xcom serial/LAN protocol, used to read
//! and write datapoints on Xtender, VarioTrack, VarioString, BSP/BMS and
//! RCC devices behind an Xcom-232i, Xcom-LAN or Moxa gateway.
//!
//! ## Features
//!
//! - **Async/await**: built on Tokio; one shared connection, FIFO request
//!   serialization, bounded timeouts everywhere
//! - **Complete wire codec**: checksummed package framing plus all scalar
//!   property formats (bool, enums, int32, float, GUID, ISO-8859-15 text)
//! - **Robust request engine**: response correlation over a noisy shared
//!   bus, bounded retries, retry/latency diagnostics
//! - **Multi-info batching**: up to 76 info datapoints per round trip, with
//!   graceful per-item degradation when a batch fails
//! - **Three transports**: TCP (gateway dials in), UDP datagrams, serial
//! - **Catalog driven**: JSON datapoint and message catalogs with
//!   120/240 Vac variants
//!
//! ## Services
//!
//! | object_type | service | support |
//! |-------------|---------|---------|
//! | 0x0001 INFO | READ | ✅ |
//! | 0x0002 PARAMETER | READ / WRITE | ✅ |
//! | 0x0003 MESSAGE | READ | ✅ |
//! | 0x0004 GUID | READ | ✅ |
//! | 0x0005 DATALOG | — | not supported |
//! | 0x000A MULTI_INFO | READ | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use voltage_xcom::{TcpTransport, XcomClient, XcomDataset, XcomVoltage};
//!
//! #[tokio::main]
//! async fn main() -> voltage_xcom::XcomResult<()> {
//!     let dataset = XcomDataset::load(
//!         XcomVoltage::Ac240,
//!         "catalog/datapoints_240v.json",
//!         "catalog/datapoints_120v.json",
//!     )
//!     .await?;
//!
//!     // the Moxa gateway connects to us
//!     let transport = TcpTransport::accept(4001, Duration::from_secs(30)).await?;
//!     let client = XcomClient::new(transport);
//!
//!     // read info 3023 "Output power" from the first Xtender
//!     let output_power = dataset.get_by_nr(3023, Some("xt"))?;
//!     let value = client.request_value(output_power, "XT1").await?;
//!     println!("XT1 output power: {value} kW");
//!
//!     // write param 1107 "Maximum current of AC source"
//!     let ac_current = dataset.get_by_nr(1107, Some("xt"))?;
//!     client.update_value(ac_current, 4.0f32, "XT1").await?;
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Protocol constants based on the Studer specification
pub mod constants;

/// Wire codec for scalar property values
pub mod value;

/// Package framing with running checksums
pub mod protocol;

/// Payload codecs for multi-info and message services
pub mod data;

/// TCP, UDP and serial transports
pub mod transport;

/// Request engine and batching layer
pub mod client;

/// Datapoint catalog loaded from JSON
pub mod datapoints;

/// Device families and address bookkeeping
pub mod families;

/// Aggregate request/result types for multi-datapoint reads
pub mod values;

/// Pending-message catalog and decoding
pub mod messages;

/// Sequential device discovery
pub mod discover;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use voltage_xcom::tokio) ===
pub use tokio;

// === Core client API ===
pub use client::{XcomClient, XcomDiagnostics};

// === Error handling ===
pub use error::{XcomError, XcomResult};

// === Core types ===
pub use constants::{
    AggregationType, ObjectType, PropertyId, ServiceId, XcomCategory, XcomLevel,
};
pub use protocol::{checksum, XcomFrame, XcomHeader, XcomPackage, XcomService, START_BYTE};
pub use value::{XcomFormat, XcomValue};

// === Catalogs and addressing ===
pub use datapoints::{DatapointBound, XcomDatapoint, XcomDataset, XcomVoltage};
pub use families::{DeviceSelector, XcomDeviceFamilies, XcomDeviceFamily};

// === Aggregated reads ===
pub use data::{MessageRsp, MultiInfoReq, MultiInfoReqItem, MultiInfoRsp, MultiInfoRspItem};
pub use values::{XcomValues, XcomValuesItem};

// === Messages and discovery ===
pub use discover::{XcomDiscover, XcomDiscoveredDevice};
pub use messages::{XcomMessage, XcomMessageDef, XcomMessageSet};

// === Transports ===
pub use transport::{SerialTransport, TcpTransport, UdpTransport, XcomTransport};

// === Protocol limits and defaults (commonly needed constants) ===
pub use constants::{
    DEFAULT_SERIAL_BAUDRATE, DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, MULTI_INFO_REQ_MAX,
    REQ_RETRIES, REQ_TIMEOUT, START_TIMEOUT,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage Xcom v{VERSION} - async Studer Xcom protocol client by Evan Liu")
}
