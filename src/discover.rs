//! Device discovery: sequentially probe every family's address range
//! through an existing client connection.
//!
//! For each family one well-known datapoint is read per candidate address;
//! the first address that does not answer ends the scan of that family.
//! BSP and BMS share address 601 and are told apart by which discovery
//! datapoint they answer.

use byteorder::{BigEndian, WriteBytesExt};
use tracing::{debug, info, warn};

use crate::client::XcomClient;
use crate::datapoints::{XcomDatapoint, XcomDataset};
use crate::error::XcomResult;
use crate::families::XcomDeviceFamilies;
use crate::transport::XcomTransport;
use crate::value::XcomValue;

/// A device found on the bus
#[derive(Debug, Clone, PartialEq)]
pub struct XcomDiscoveredDevice {
    pub code: String,
    pub addr: u32,
    pub family_id: String,
    pub family_model: String,

    // extended info, filled on request
    pub device_model: Option<String>,
    pub hw_version: Option<String>,
    pub sw_version: Option<String>,
    pub fid: Option<String>,
}

/// Sequential prober over the families' address ranges
pub struct XcomDiscover<'a, T: XcomTransport> {
    api: &'a XcomClient<T>,
    dataset: &'a XcomDataset,
}

impl<'a, T: XcomTransport> XcomDiscover<'a, T> {
    pub fn new(api: &'a XcomClient<T>, dataset: &'a XcomDataset) -> Self {
        XcomDiscover { api, dataset }
    }

    /// Probe all families and return the devices that answered.
    ///
    /// With `extended_info` set, each found device is queried for its model,
    /// hardware/software versions and FID.
    pub async fn discover_devices(&self, extended_info: bool) -> Vec<XcomDiscoveredDevice> {
        let mut devices = Vec::new();

        for family in XcomDeviceFamilies::all() {
            info!("Trying family {} ({})", family.id, family.model);

            // probe with the family's discovery nr, or the first info/param nr
            let nr = [family.nr_discover, family.nr_infos_start, family.nr_params_start]
                .into_iter()
                .find(|&nr| nr != 0);
            let Some(nr) = nr else { continue };

            let Ok(datapoint) = self.dataset.get_by_nr(nr, Some(family.id_for_nr)) else {
                warn!("Discovery datapoint {nr} for family {} not in catalog", family.id);
                continue;
            };

            // scan addresses up to the first one that does not answer
            for device_addr in family.addr_devices_start..=family.addr_devices_end {
                // in-range addresses always have a code
                let device_code = match family.code(device_addr) {
                    Ok(code) => code,
                    Err(_) => break,
                };

                debug!("Trying device {device_code} on {device_addr} for nr {nr}");
                match self.api.request_value(datapoint, device_addr).await {
                    Ok(_) => {
                        info!("Found device {device_code} via {nr}:{device_addr}");

                        let mut device = XcomDiscoveredDevice {
                            code: device_code,
                            addr: device_addr,
                            family_id: family.id.to_string(),
                            family_model: family.model.to_string(),
                            device_model: None,
                            hw_version: None,
                            sw_version: None,
                            fid: None,
                        };
                        if extended_info {
                            self.fill_extended_info(&mut device).await;
                        }
                        devices.push(device);
                    }
                    Err(err) => {
                        // DEVICE_NOT_FOUND or INVALID_DATA: no more devices
                        // in this family (INVALID_DATA tells BSP from BMS)
                        debug!("No device {device_code}: {err}");
                        break;
                    }
                }
            }
        }

        devices
    }

    /// Query model, hardware/software version and FID of a found device.
    /// Failures leave the fields unset; not every device has these ids.
    pub async fn fill_extended_info(&self, device: &mut XcomDiscoveredDevice) {
        debug!("Trying to get extended device info for {}", device.code);

        let id_type = self.value_by_name("ID type", &device.family_id, device.addr).await;
        let id_hw = self.value_by_name("ID HW", &device.family_id, device.addr).await;
        let id_hw_pwr = self.value_by_name("ID HW PWR", &device.family_id, device.addr).await;
        let id_sw_msb = self.value_by_name("ID SOFT msb", &device.family_id, device.addr).await;
        let id_sw_lsb = self.value_by_name("ID SOFT lsb", &device.family_id, device.addr).await;
        let id_fid_msb = self.value_by_name("ID FID msb", &device.family_id, device.addr).await;
        let id_fid_lsb = self.value_by_name("ID FID lsb", &device.family_id, device.addr).await;

        device.device_model = self.decode_type(id_type, "ID type", &device.family_id);
        device.hw_version = decode_id_hw(id_hw, id_hw_pwr);
        device.sw_version = decode_id_sw(id_sw_msb, id_sw_lsb);
        device.fid = decode_fid(id_fid_msb, id_fid_lsb);

        info!(
            "Extended device info for {}: model {:?}, hw {:?}, sw {:?}, fid {:?}",
            device.code, device.device_model, device.hw_version, device.sw_version, device.fid
        );
    }

    async fn value_by_name(&self, name: &str, family_id: &str, addr: u32) -> Option<XcomValue> {
        let datapoint: &XcomDatapoint = self.dataset.get_by_name(name, Some(family_id)).ok()?;
        self.api.request_value(datapoint, addr).await.ok()
    }

    fn decode_type(&self, value: Option<XcomValue>, name: &str, family_id: &str) -> Option<String> {
        let raw = value?.as_i64()?;
        self.dataset
            .get_by_name(name, Some(family_id))
            .ok()?
            .option_label(raw)
            .map(str::to_string)
    }
}

fn to_be_bytes(value: &XcomValue) -> XcomResult<[u8; 2]> {
    let mut buf = Vec::with_capacity(2);
    buf.write_u16::<BigEndian>(value.as_i64().unwrap_or(0) as u16)?;
    Ok([buf[0], buf[1]])
}

/// "ID HW" encodes cmd and pwr board versions as major.minor byte pairs
fn decode_id_hw(cmd: Option<XcomValue>, pwr: Option<XcomValue>) -> Option<String> {
    let cmd = to_be_bytes(&cmd?).ok()?;
    match pwr.and_then(|v| to_be_bytes(&v).ok()) {
        Some(pwr) => Some(format!("{}.{} / {}.{}", cmd[0], cmd[1], pwr[0], pwr[1])),
        None => Some(format!("{}.{}", cmd[0], cmd[1])),
    }
}

/// "ID SOFT msb/lsb" encode the software version as bytes of two shorts
fn decode_id_sw(msb: Option<XcomValue>, lsb: Option<XcomValue>) -> Option<String> {
    let msb = to_be_bytes(&msb?).ok()?;
    let lsb = to_be_bytes(&lsb?).ok()?;
    Some(format!("{}.{}.{}", msb[0], lsb[0], lsb[1]))
}

/// "ID FID msb/lsb" concatenate to the 8-hex-digit factory id
fn decode_fid(msb: Option<XcomValue>, lsb: Option<XcomValue>) -> Option<String> {
    let msb = to_be_bytes(&msb?).ok()?;
    let lsb = to_be_bytes(&lsb?).ok()?;
    Some(format!("{}{}", hex::encode_upper(msb), hex::encode_upper(lsb)))
}
