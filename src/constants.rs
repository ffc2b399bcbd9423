//! Xcom protocol constants based on the Studer "Technical specification -
//! Xtender serial protocol" document.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{XcomError, XcomResult};

/// Default TCP port the Moxa gateway connects to (Xcom-LAN)
pub const DEFAULT_TCP_PORT: u16 = 4001;

/// Default UDP port for Xcom-LAN datagram mode
pub const DEFAULT_UDP_PORT: u16 = 4001;

/// Default baudrate of the Xcom-RS232i serial link
pub const DEFAULT_SERIAL_BAUDRATE: u32 = 115200;

/// Default wait for the gateway to establish its connection
pub const START_TIMEOUT: Duration = Duration::from_secs(30);

/// Default wait for a clean shutdown
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-attempt response deadline
pub const REQ_TIMEOUT: Duration = Duration::from_secs(3);

/// Default number of attempts per logical request
pub const REQ_RETRIES: u32 = 3;

/// Maximum number of items in one multi-info request (wire size limit)
pub const MULTI_INFO_REQ_MAX: usize = 76;

/// Number of consecutive requests issued before the batch layer pauses
pub const REQUEST_BURST_SIZE: usize = 10;

/// Pause between request bursts, leaving bus time for the gateway's own
/// periodic uplink traffic
pub const REQUEST_BURST_PAUSE: Duration = Duration::from_secs(1);

/// Well-known bus addresses
pub mod addr {
    /// Broadcast destination (write only)
    pub const BROADCAST: u32 = 0;
    /// Address this client uses as src_addr
    pub const SOURCE: u32 = 1;
    /// The RCC remote control; also the destination for multi-info,
    /// GUID and message requests
    pub const RCC: u32 = 501;
}

/// service_id values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServiceId {
    Read = 0x01,
    Write = 0x02,
}

impl ServiceId {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> XcomResult<Self> {
        match value {
            0x01 => Ok(ServiceId::Read),
            0x02 => Ok(ServiceId::Write),
            other => Err(XcomError::frame(format!("Unknown service_id 0x{other:02x}"))),
        }
    }
}

/// object_type values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ObjectType {
    Info = 0x0001,
    Parameter = 0x0002,
    Message = 0x0003,
    Guid = 0x0004,
    /// Datalog transfers are not supported by this client; the constant
    /// exists only so incoming traffic can be named in logs
    Datalog = 0x0005,
    MultiInfo = 0x000A,
}

impl ObjectType {
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// object_id sentinels for object types that do not address a datapoint
pub mod object_id {
    pub const NONE: u32 = 0x0000_0000;
    pub const MULTI_INFO: u32 = 0x0000_0001;
}

/// property_id values (QSP ids)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PropertyId {
    None = 0x0000,
    MultiInfo = 0x0001,
    /// The flash-persisted value of a parameter, or the live value of an info
    Value = 0x0005,
    Min = 0x0006,
    Max = 0x0007,
    Level = 0x0008,
    /// The live in-RAM value of a parameter, possibly not yet persisted
    UnsavedValue = 0x000D,
}

impl PropertyId {
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Access level of a datapoint, as listed in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XcomLevel {
    /// Read-only telemetry
    Info,
    /// View only, used for param RCC 5012 (User Level)
    ViewOnly,
    Basic,
    Expert,
    Installer,
    Qsp,
}

impl XcomLevel {
    /// Derive the read/write category from the access level
    pub fn category(self) -> XcomCategory {
        match self {
            XcomLevel::Info => XcomCategory::Info,
            _ => XcomCategory::Parameter,
        }
    }
}

impl FromStr for XcomLevel {
    type Err = XcomError;

    fn from_str(s: &str) -> XcomResult<Self> {
        match s.to_uppercase().as_str() {
            "INFO" => Ok(XcomLevel::Info),
            "VO" | "V.O." => Ok(XcomLevel::ViewOnly),
            "BASIC" => Ok(XcomLevel::Basic),
            "EXPERT" => Ok(XcomLevel::Expert),
            "INST" | "INST." => Ok(XcomLevel::Installer),
            "QSP" => Ok(XcomLevel::Qsp),
            other => Err(XcomError::configuration(format!("Unknown level: '{other}'"))),
        }
    }
}

/// Read/write category of a datapoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XcomCategory {
    /// Read-only telemetry, queried with [`PropertyId::Value`]
    Info,
    /// Writable configuration, queried with [`PropertyId::UnsavedValue`]
    Parameter,
}

impl XcomCategory {
    pub fn object_type(self) -> ObjectType {
        match self {
            XcomCategory::Info => ObjectType::Info,
            XcomCategory::Parameter => ObjectType::Parameter,
        }
    }
}

/// Aggregation selector of a multi-info item: which physical device's value
/// (or which computed aggregate) the item refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationType {
    /// The master device of the family
    Master,
    /// A per-device slot, 1-15
    Device(u8),
    /// Average over the devices of the family
    Average,
    /// Sum over the devices of the family
    Sum,
}

impl AggregationType {
    pub fn to_u8(self) -> u8 {
        match self {
            AggregationType::Master => 0x00,
            AggregationType::Device(n) => n,
            AggregationType::Average => 0xFD,
            AggregationType::Sum => 0xFE,
        }
    }

    pub fn from_u8(value: u8) -> XcomResult<Self> {
        match value {
            0x00 => Ok(AggregationType::Master),
            1..=15 => Ok(AggregationType::Device(value)),
            0xFD => Ok(AggregationType::Average),
            0xFE => Ok(AggregationType::Sum),
            other => Err(XcomError::frame(format!(
                "Unknown aggregation_type 0x{other:02x}"
            ))),
        }
    }

    /// True for the per-device slot range, the only selectors the batch
    /// layer may aggregate
    pub fn is_device_slot(self) -> bool {
        matches!(self, AggregationType::Device(_))
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationType::Master => write!(f, "MASTER"),
            AggregationType::Device(n) => write!(f, "DEVICE{n}"),
            AggregationType::Average => write!(f, "AVERAGE"),
            AggregationType::Sum => write!(f, "SUM"),
        }
    }
}

impl FromStr for AggregationType {
    type Err = XcomError;

    fn from_str(s: &str) -> XcomResult<Self> {
        let s = s.to_uppercase();
        match s.as_str() {
            "MASTER" => Ok(AggregationType::Master),
            "AVERAGE" => Ok(AggregationType::Average),
            "SUM" => Ok(AggregationType::Sum),
            _ => {
                if let Some(n) = s.strip_prefix("DEVICE") {
                    if let Ok(n @ 1..=15) = n.parse::<u8>() {
                        return Ok(AggregationType::Device(n));
                    }
                }
                Err(XcomError::configuration(format!(
                    "Unknown aggregation_type: '{s}'"
                )))
            }
        }
    }
}

/// Flags of a multi-info response
pub mod multi_info_flags {
    /// Set when connected via Xcom-GSM, clear for Xcom-LAN
    pub const XCOM_GSM: u32 = 0x0000_0010;
    pub const XT_PRESENT: u32 = 0x0000_0020;
    pub const BSP_PRESENT: u32 = 0x0000_0040;
    pub const VT_PRESENT: u32 = 0x0000_0080;
    pub const VS_PRESENT: u32 = 0x0000_0100;
}

/// SCOM error codes carried by error-flagged responses
const ERROR_CODES: &[(u16, &str)] = &[
    (0x0000, "NO_ERROR"),
    (0x0001, "INVALID_FRAME"),
    (0x0002, "DEVICE_NOT_FOUND"),
    (0x0003, "RESPONSE_TIMEOUT"),
    (0x0011, "SERVICE_NOT_SUPPORTED"),
    (0x0012, "INVALID_SERVICE_ARGUMENT"),
    (0x0013, "SCOM_ERROR_GATEWAY_BUSY"),
    (0x0021, "TYPE_NOT_SUPPORTED"),
    (0x0022, "OBJECT_ID_NOT_FOUND"),
    (0x0023, "PROPERTY_NOT_SUPPORTED"),
    (0x0024, "INVALID_DATA_LENGTH"),
    (0x0025, "PROPERTY_IS_READ_ONLY"),
    (0x0026, "INVALID_DATA"),
    (0x0027, "DATA_TOO_SMALL"),
    (0x0028, "DATA_TOO_BIG"),
    (0x0029, "WRITE_PROPERTY_FAILED"),
    (0x002A, "READ_PROPERTY_FAILED"),
    (0x002B, "ACCESS_DENIED"),
    (0x002C, "SCOM_ERROR_OBJECT_NOT_SUPPORTED"),
    (0x002D, "SCOM_ERROR_MULTICAST_READ_NOT_SUPPORTED"),
    (0x002E, "OBJECT_PROPERTY_INVALID"),
    (0x002F, "FILE_OR_DIR_NOT_PRESENT"),
    (0x0030, "FILE_CORRUPTED"),
    (0x0081, "INVALID_SHELL_ARG"),
];

/// Map a SCOM error code to its name. Unknown codes render as a hex
/// fallback string rather than failing.
pub fn error_name(code: u16) -> String {
    ERROR_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| format!("unknown error '{code:04x}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregation_type_round_trip() {
        for byte in [0x00, 0x01, 0x0F, 0xFD, 0xFE] {
            let aggr = AggregationType::from_u8(byte).unwrap();
            assert_eq!(aggr.to_u8(), byte);
        }
        assert!(AggregationType::from_u8(0x10).is_err());
        assert!(AggregationType::from_u8(0xFF).is_err());
    }

    #[test]
    fn test_aggregation_type_strings() {
        assert_eq!("MASTER".parse::<AggregationType>().unwrap(), AggregationType::Master);
        assert_eq!("DEVICE7".parse::<AggregationType>().unwrap(), AggregationType::Device(7));
        assert_eq!("SUM".parse::<AggregationType>().unwrap(), AggregationType::Sum);
        assert_eq!(AggregationType::Device(15).to_string(), "DEVICE15");
        assert!("DEVICE16".parse::<AggregationType>().is_err());
    }

    #[test]
    fn test_level_category() {
        assert_eq!(XcomLevel::Info.category(), XcomCategory::Info);
        assert_eq!(XcomLevel::Basic.category(), XcomCategory::Parameter);
        assert_eq!(XcomLevel::Qsp.category(), XcomCategory::Parameter);
        assert_eq!("INST.".parse::<XcomLevel>().unwrap(), XcomLevel::Installer);
    }

    #[test]
    fn test_error_name() {
        assert_eq!(error_name(0x002A), "READ_PROPERTY_FAILED");
        assert_eq!(error_name(0x0013), "SCOM_ERROR_GATEWAY_BUSY");
        assert_eq!(error_name(0xFEDC), "unknown error 'fedc'");
    }
}
