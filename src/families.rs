//! Device families of the Studer bus and the address bookkeeping around
//! them.
//!
//! Every family owns a multicast address, a contiguous device address range
//! and datapoint number ranges. The lookup maps between device codes
//! ("XT1", "VS7"), bus addresses and aggregation slots are built once at
//! construction and are immutable afterwards; share the structure via `Arc`
//! between the client, batch layer and discovery.

use std::collections::HashMap;
use std::fmt;

use crate::constants::AggregationType;
use crate::error::{XcomError, XcomResult};

/// A device class with its own address range and datapoint number range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XcomDeviceFamily {
    pub id: &'static str,
    /// Family id used for datapoint lookups; the L1-L3 phases use the
    /// Xtender numbers
    pub id_for_nr: &'static str,
    pub model: &'static str,
    /// Multicast address reaching all devices of the family (write only)
    pub addr_multicast: u32,
    pub addr_devices_start: u32,
    pub addr_devices_end: u32,
    pub nr_params_start: u32,
    pub nr_params_end: u32,
    pub nr_infos_start: u32,
    pub nr_infos_end: u32,
    /// Datapoint number probed during device discovery
    pub nr_discover: u32,
}

impl XcomDeviceFamily {
    /// Device code for an address within this family ("XT1".."XT9")
    pub fn code(&self, addr: u32) -> XcomResult<String> {
        if addr == self.addr_multicast {
            return Ok(self.id.to_uppercase());
        }

        if self.addr_devices_start == addr && addr == self.addr_devices_end {
            return Ok(self.id.to_uppercase());
        }

        if self.addr_devices_start <= addr && addr <= self.addr_devices_end {
            let idx = addr - self.addr_devices_start + 1;
            return Ok(format!("{}{}", self.id.to_uppercase(), idx));
        }

        Err(XcomError::not_found(format!(
            "Addr {addr} is not in range for family {} addresses ({}-{})",
            self.id, self.addr_devices_start, self.addr_devices_end
        )))
    }
}

/// All known device families
pub static FAMILIES: &[XcomDeviceFamily] = &[
    XcomDeviceFamily {
        id: "xt",
        id_for_nr: "xt",
        model: "Xtender",
        addr_multicast: 100,
        addr_devices_start: 101,
        addr_devices_end: 109,
        nr_params_start: 1000,
        nr_params_end: 1999,
        nr_infos_start: 3000,
        nr_infos_end: 3999,
        nr_discover: 3000,
    },
    XcomDeviceFamily {
        id: "l1",
        id_for_nr: "xt",
        model: "Phase L1",
        addr_multicast: 191,
        addr_devices_start: 191,
        addr_devices_end: 191,
        nr_params_start: 1000,
        nr_params_end: 1999,
        nr_infos_start: 3000,
        nr_infos_end: 3999,
        nr_discover: 3000,
    },
    XcomDeviceFamily {
        id: "l2",
        id_for_nr: "xt",
        model: "Phase L2",
        addr_multicast: 192,
        addr_devices_start: 192,
        addr_devices_end: 192,
        nr_params_start: 1000,
        nr_params_end: 1999,
        nr_infos_start: 3000,
        nr_infos_end: 3999,
        nr_discover: 3000,
    },
    XcomDeviceFamily {
        id: "l3",
        id_for_nr: "xt",
        model: "Phase L3",
        addr_multicast: 193,
        addr_devices_start: 193,
        addr_devices_end: 193,
        nr_params_start: 1000,
        nr_params_end: 1999,
        nr_infos_start: 3000,
        nr_infos_end: 3999,
        nr_discover: 3000,
    },
    XcomDeviceFamily {
        id: "rcc",
        id_for_nr: "rcc",
        model: "RCC",
        addr_multicast: 500,
        addr_devices_start: 501,
        addr_devices_end: 501,
        nr_params_start: 5000,
        nr_params_end: 5999,
        nr_infos_start: 0,
        nr_infos_end: 0,
        nr_discover: 5002,
    },
    XcomDeviceFamily {
        id: "bsp",
        id_for_nr: "bsp",
        model: "BSP",
        addr_multicast: 600,
        addr_devices_start: 601,
        addr_devices_end: 601,
        nr_params_start: 6000,
        nr_params_end: 6999,
        nr_infos_start: 7000,
        nr_infos_end: 7999,
        nr_discover: 7036,
    },
    XcomDeviceFamily {
        id: "bms",
        id_for_nr: "bms",
        model: "Xcom-CAN BMS",
        addr_multicast: 600,
        addr_devices_start: 601,
        addr_devices_end: 601,
        nr_params_start: 6000,
        nr_params_end: 6999,
        nr_infos_start: 7000,
        nr_infos_end: 7999,
        nr_discover: 7054,
    },
    XcomDeviceFamily {
        id: "vt",
        id_for_nr: "vt",
        model: "VarioTrack",
        addr_multicast: 300,
        addr_devices_start: 301,
        addr_devices_end: 315,
        nr_params_start: 10000,
        nr_params_end: 10999,
        nr_infos_start: 11000,
        nr_infos_end: 11999,
        nr_discover: 11000,
    },
    XcomDeviceFamily {
        id: "vs",
        id_for_nr: "vs",
        model: "VarioString",
        addr_multicast: 700,
        addr_devices_start: 701,
        addr_devices_end: 715,
        nr_params_start: 14000,
        nr_params_end: 14999,
        nr_infos_start: 15000,
        nr_infos_end: 15999,
        nr_discover: 15000,
    },
];

/// How a caller names the target of a request: a symbolic device code, a
/// raw bus address, or an aggregation selector. Resolved once at the
/// boundary into a canonical (code, address, selector) form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    Code(String),
    Address(u32),
    Aggregation(AggregationType),
}

impl From<&str> for DeviceSelector {
    fn from(code: &str) -> Self {
        DeviceSelector::Code(code.to_string())
    }
}

impl From<String> for DeviceSelector {
    fn from(code: String) -> Self {
        DeviceSelector::Code(code)
    }
}

impl From<u32> for DeviceSelector {
    fn from(addr: u32) -> Self {
        DeviceSelector::Address(addr)
    }
}

impl From<AggregationType> for DeviceSelector {
    fn from(aggr: AggregationType) -> Self {
        DeviceSelector::Aggregation(aggr)
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Code(code) => f.write_str(code),
            DeviceSelector::Address(addr) => write!(f, "{addr}"),
            DeviceSelector::Aggregation(aggr) => write!(f, "{aggr}"),
        }
    }
}

/// Immutable code/address/aggregation lookup maps over [`FAMILIES`]
#[derive(Debug)]
pub struct XcomDeviceFamilies {
    code_to_family: HashMap<String, &'static XcomDeviceFamily>,
    code_to_addr: HashMap<String, u32>,
    code_to_aggr: HashMap<String, AggregationType>,
    addr_to_aggr: HashMap<u32, AggregationType>,
}

impl XcomDeviceFamilies {
    pub fn new() -> Self {
        let mut code_to_family = HashMap::new();
        let mut code_to_addr = HashMap::new();
        let mut code_to_aggr = HashMap::new();
        let mut addr_to_aggr = HashMap::new();

        for family in FAMILIES {
            for addr in family.addr_devices_start..=family.addr_devices_end {
                // in-range addresses always have a code
                let code = family.code(addr).expect("address within family range");
                let slot = (addr - family.addr_devices_start + 1) as u8;
                let aggr = AggregationType::Device(slot);

                code_to_family.insert(code.clone(), family);
                code_to_addr.insert(code.clone(), addr);
                code_to_aggr.insert(code, aggr);
                addr_to_aggr.insert(addr, aggr);
            }

            // the bare code of a multi-device family addresses its master
            if family.addr_devices_start != family.addr_devices_end {
                code_to_aggr.insert(family.id.to_uppercase(), AggregationType::Master);
            }
        }

        XcomDeviceFamilies {
            code_to_family,
            code_to_addr,
            code_to_aggr,
            addr_to_aggr,
        }
    }

    pub fn all() -> &'static [XcomDeviceFamily] {
        FAMILIES
    }

    pub fn by_id(id: &str) -> XcomResult<&'static XcomDeviceFamily> {
        FAMILIES
            .iter()
            .find(|f| f.id == id)
            .ok_or_else(|| XcomError::not_found(format!("Unknown device family '{id}'")))
    }

    pub fn by_code(&self, code: &str) -> XcomResult<&'static XcomDeviceFamily> {
        self.code_to_family
            .get(code)
            .copied()
            .ok_or_else(|| XcomError::not_found(format!("Unknown device code '{code}'")))
    }

    /// Bus address of a single-device code like "XT3" or "BSP"
    pub fn address_by_code(&self, code: &str) -> XcomResult<u32> {
        self.code_to_addr
            .get(code)
            .copied()
            .ok_or_else(|| XcomError::not_found(format!("Unknown device code '{code}'")))
    }

    /// Device code for a bus address, scoped to the datapoint's family
    pub fn code_by_address(&self, addr: u32, family_id: &str) -> XcomResult<String> {
        Self::by_id(family_id)?.code(addr)
    }

    pub fn aggregation_by_code(&self, code: &str) -> XcomResult<AggregationType> {
        self.code_to_aggr
            .get(code)
            .copied()
            .ok_or_else(|| XcomError::not_found(format!("Unknown device code '{code}'")))
    }

    /// Aggregation slot of a device address. Address 601 can be either BSP
    /// or BMS, but both map to slot 1.
    pub fn aggregation_by_address(&self, addr: u32) -> XcomResult<AggregationType> {
        self.addr_to_aggr
            .get(&addr)
            .copied()
            .ok_or_else(|| XcomError::not_found(format!("Unknown device address '{addr}'")))
    }

    /// Resolve any selector form to its aggregation selector
    pub fn aggregation_by_selector(&self, selector: &DeviceSelector) -> XcomResult<AggregationType> {
        match selector {
            DeviceSelector::Code(code) => self.aggregation_by_code(code),
            DeviceSelector::Address(addr) => self.aggregation_by_address(*addr),
            DeviceSelector::Aggregation(aggr) => Ok(*aggr),
        }
    }

    /// Device code behind an aggregation selector within a family, if the
    /// selector names a single device
    pub fn code_by_aggregation(&self, aggr: AggregationType, family_id: &str) -> Option<String> {
        self.address_by_aggregation(aggr, family_id)
            .and_then(|addr| Self::by_id(family_id).ok()?.code(addr).ok())
    }

    /// Bus address behind an aggregation selector within a family, if the
    /// selector names a single device
    pub fn address_by_aggregation(&self, aggr: AggregationType, family_id: &str) -> Option<u32> {
        let family = Self::by_id(family_id).ok()?;
        match aggr {
            AggregationType::Device(slot) => {
                let addr = family.addr_devices_start + u32::from(slot) - 1;
                (addr <= family.addr_devices_end).then_some(addr)
            }
            _ => None,
        }
    }
}

impl Default for XcomDeviceFamilies {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_codes() {
        let xt = XcomDeviceFamilies::by_id("xt").unwrap();
        assert_eq!(xt.code(100).unwrap(), "XT");
        assert_eq!(xt.code(101).unwrap(), "XT1");
        assert_eq!(xt.code(109).unwrap(), "XT9");
        assert!(xt.code(110).is_err());

        let bsp = XcomDeviceFamilies::by_id("bsp").unwrap();
        assert_eq!(bsp.code(601).unwrap(), "BSP");

        assert!(XcomDeviceFamilies::by_id("nope").is_err());
    }

    #[test]
    fn test_address_lookups() {
        let families = XcomDeviceFamilies::new();

        assert_eq!(families.address_by_code("XT1").unwrap(), 101);
        assert_eq!(families.address_by_code("VT15").unwrap(), 315);
        assert_eq!(families.address_by_code("VS7").unwrap(), 707);
        assert_eq!(families.address_by_code("RCC").unwrap(), 501);

        // the bare multi-device code has no single address
        assert!(families.address_by_code("XT").is_err());
        assert!(families.address_by_code("XT10").is_err());

        assert_eq!(families.code_by_address(101, "xt").unwrap(), "XT1");
        assert_eq!(families.code_by_address(315, "vt").unwrap(), "VT15");
        assert!(families.code_by_address(101, "vt").is_err());
    }

    #[test]
    fn test_aggregation_lookups() {
        let families = XcomDeviceFamilies::new();

        assert_eq!(families.aggregation_by_code("XT1").unwrap(), AggregationType::Device(1));
        assert_eq!(families.aggregation_by_code("VT15").unwrap(), AggregationType::Device(15));
        assert_eq!(families.aggregation_by_code("XT").unwrap(), AggregationType::Master);
        assert_eq!(families.aggregation_by_address(109).unwrap(), AggregationType::Device(9));
        assert_eq!(families.aggregation_by_address(601).unwrap(), AggregationType::Device(1));
        assert!(families.aggregation_by_address(110).is_err());

        assert_eq!(
            families
                .aggregation_by_selector(&DeviceSelector::from("XT2"))
                .unwrap(),
            AggregationType::Device(2)
        );
        assert_eq!(
            families
                .aggregation_by_selector(&DeviceSelector::from(AggregationType::Sum))
                .unwrap(),
            AggregationType::Sum
        );
    }

    #[test]
    fn test_aggregation_back_resolution() {
        let families = XcomDeviceFamilies::new();

        assert_eq!(
            families.address_by_aggregation(AggregationType::Device(3), "xt"),
            Some(103)
        );
        assert_eq!(
            families.code_by_aggregation(AggregationType::Device(3), "xt"),
            Some("XT3".to_string())
        );
        // slot out of the family's range
        assert_eq!(families.address_by_aggregation(AggregationType::Device(12), "xt"), None);
        // aggregates name no single device
        assert_eq!(families.address_by_aggregation(AggregationType::Average, "xt"), None);
        assert_eq!(families.code_by_aggregation(AggregationType::Master, "xt"), None);
    }
}
