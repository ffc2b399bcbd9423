//! The datapoint catalog: ~1400 named parameters and infos loaded from
//! JSON.
//!
//! The catalog ships as a 240 Vac base list plus a 120 Vac override list;
//! selecting 120 Vac merges the overrides into the base by (nr, family)
//! identity, preserving the base ordering so menu trees stay intact.
//! Records that fail validation are skipped, not fatal.

use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::constants::{ObjectType, XcomCategory, XcomLevel};
use crate::error::{XcomError, XcomResult};
use crate::value::XcomFormat;

/// Grid voltage variant of the installation, selecting which catalog
/// overrides apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XcomVoltage {
    Ac120,
    Ac240,
}

impl FromStr for XcomVoltage {
    type Err = XcomError;

    fn from_str(s: &str) -> XcomResult<Self> {
        match s.to_uppercase().as_str() {
            "120 VAC" | "120_VAC" => Ok(XcomVoltage::Ac120),
            "240 VAC" | "240_VAC" => Ok(XcomVoltage::Ac240),
            other => Err(XcomError::configuration(format!("Unknown voltage: '{other}'"))),
        }
    }
}

/// A catalog bound (default/min/max/increment): either a number or the
/// marker "S" for signal-typed parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DatapointBound {
    Value(f64),
    Signal,
}

/// One catalog entry describing a datapoint
#[derive(Debug, Clone, PartialEq)]
pub struct XcomDatapoint {
    pub family_id: String,
    pub level: XcomLevel,
    /// Menu parent nr; 0 for top-level entries
    pub parent: u32,
    pub nr: u32,
    pub name: String,
    /// Abbreviated/coded name
    pub abbr: String,
    pub unit: String,
    pub format: XcomFormat,
    pub default: Option<DatapointBound>,
    pub min: Option<DatapointBound>,
    pub max: Option<DatapointBound>,
    pub inc: Option<DatapointBound>,
    /// Enum value -> label table, where the format has one
    pub options: Option<serde_json::Map<String, Value>>,
}

impl XcomDatapoint {
    /// Construct a catalog entry programmatically (mainly for tests and
    /// tooling; production catalogs come from JSON)
    pub fn new(
        nr: u32,
        name: &str,
        family_id: &str,
        level: XcomLevel,
        format: XcomFormat,
        unit: &str,
    ) -> Self {
        XcomDatapoint {
            family_id: family_id.to_string(),
            level,
            parent: 0,
            nr,
            name: name.to_string(),
            abbr: String::new(),
            unit: unit.to_string(),
            format,
            default: None,
            min: None,
            max: None,
            inc: None,
            options: None,
        }
    }

    /// INFO-level points are read-only telemetry; every other level is a
    /// writable parameter
    pub fn category(&self) -> XcomCategory {
        self.level.category()
    }

    pub fn object_type(&self) -> ObjectType {
        self.category().object_type()
    }

    /// Label of an enum option for a raw value, if the entry has options
    pub fn option_label(&self, value: i64) -> Option<&str> {
        self.options
            .as_ref()?
            .get(&value.to_string())
            .and_then(Value::as_str)
    }
}

/// Raw JSON shape of a catalog record
#[derive(Debug, Deserialize)]
struct RawDatapoint {
    fam: Option<String>,
    lvl: Option<String>,
    pnr: Option<Value>,
    nr: Option<Value>,
    name: Option<String>,
    short: Option<String>,
    unit: Option<String>,
    fmt: Option<String>,
    def: Option<Value>,
    min: Option<Value>,
    max: Option<Value>,
    inc: Option<Value>,
    opt: Option<serde_json::Map<String, Value>>,
}

fn parse_bound(value: Option<&Value>) -> Option<DatapointBound> {
    match value {
        Some(Value::Number(n)) => n.as_f64().map(DatapointBound::Value),
        Some(Value::String(s)) if s == "S" => Some(DatapointBound::Signal),
        _ => None,
    }
}

impl RawDatapoint {
    /// Validate and convert one record; `None` drops incomplete entries
    fn into_datapoint(self) -> Option<XcomDatapoint> {
        let fam = self.fam?;
        let lvl = self.lvl?;
        let name = self.name?;
        let fmt = self.fmt?;

        let parent = self.pnr.as_ref()?.as_u64()?;
        let nr = self.nr.as_ref()?.as_u64()?;

        let level = XcomLevel::from_str(&lvl).ok()?;
        let format = XcomFormat::from_str(&fmt).ok()?;

        Some(XcomDatapoint {
            family_id: fam,
            level,
            parent: parent as u32,
            nr: nr as u32,
            name: name.trim().to_string(),
            abbr: self.short.unwrap_or_default(),
            unit: self.unit.unwrap_or_default(),
            format,
            default: parse_bound(self.def.as_ref()),
            min: parse_bound(self.min.as_ref()),
            max: parse_bound(self.max.as_ref()),
            inc: parse_bound(self.inc.as_ref()),
            options: self.opt,
        })
    }
}

/// The loaded datapoint catalog
#[derive(Debug, Clone)]
pub struct XcomDataset {
    datapoints: Vec<XcomDatapoint>,
}

impl XcomDataset {
    fn parse_list(text: &str) -> XcomResult<Vec<XcomDatapoint>> {
        let raw: Vec<RawDatapoint> = serde_json::from_str(text)
            .map_err(|e| XcomError::configuration(format!("Invalid datapoint catalog: {e}")))?;

        Ok(raw
            .into_iter()
            .filter_map(RawDatapoint::into_datapoint)
            .collect())
    }

    /// Build the catalog from the 240 Vac base list and the 120 Vac
    /// override list, keeping the entries matching `voltage`.
    pub fn from_json(
        voltage: XcomVoltage,
        text_240vac: &str,
        text_120vac: &str,
    ) -> XcomResult<Self> {
        // the 240v list is the base for both variants
        let mut datapoints = Self::parse_list(text_240vac)?;

        if voltage == XcomVoltage::Ac120 {
            for dp120 in Self::parse_list(text_120vac)? {
                let slot = datapoints
                    .iter()
                    .position(|dp240| dp240.nr == dp120.nr && dp240.family_id == dp120.family_id);
                match slot {
                    Some(index) => datapoints[index] = dp120,
                    None => debug!(
                        "120 Vac override {}:{} has no base entry, skipped",
                        dp120.family_id, dp120.nr
                    ),
                }
            }
        }

        info!("Using {} datapoints for {:?}", datapoints.len(), voltage);
        Ok(XcomDataset { datapoints })
    }

    /// Load the catalog from the two JSON files on disk
    pub async fn load(
        voltage: XcomVoltage,
        path_240vac: &str,
        path_120vac: &str,
    ) -> XcomResult<Self> {
        let text_240vac = tokio::fs::read_to_string(path_240vac)
            .await
            .map_err(|e| XcomError::configuration(format!("Cannot read {path_240vac}: {e}")))?;
        let text_120vac = tokio::fs::read_to_string(path_120vac)
            .await
            .map_err(|e| XcomError::configuration(format!("Cannot read {path_120vac}: {e}")))?;

        Self::from_json(voltage, &text_240vac, &text_120vac)
    }

    /// Build a catalog from already-validated entries
    pub fn from_datapoints(datapoints: Vec<XcomDatapoint>) -> Self {
        XcomDataset { datapoints }
    }

    pub fn len(&self) -> usize {
        self.datapoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datapoints.is_empty()
    }

    /// Look up a datapoint by number, optionally scoped to a family
    pub fn get_by_nr(&self, nr: u32, family_id: Option<&str>) -> XcomResult<&XcomDatapoint> {
        self.datapoints
            .iter()
            .find(|p| p.nr == nr && family_id.map_or(true, |f| p.family_id == f))
            .ok_or_else(|| {
                XcomError::not_found(format!(
                    "Unknown datapoint nr {nr} (family {})",
                    family_id.unwrap_or("any")
                ))
            })
    }

    /// Look up a datapoint by name, optionally scoped to a family
    pub fn get_by_name(&self, name: &str, family_id: Option<&str>) -> XcomResult<&XcomDatapoint> {
        self.datapoints
            .iter()
            .find(|p| p.name == name && family_id.map_or(true, |f| p.family_id == f))
            .ok_or_else(|| {
                XcomError::not_found(format!(
                    "Unknown datapoint '{name}' (family {})",
                    family_id.unwrap_or("any")
                ))
            })
    }

    /// All datapoints below a menu parent, optionally scoped to a family
    pub fn menu_items(&self, parent: u32, family_id: Option<&str>) -> Vec<&XcomDatapoint> {
        self.datapoints
            .iter()
            .filter(|p| p.parent == parent && family_id.map_or(true, |f| p.family_id == f))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG_240V: &str = r#"[
        {"fam": "xt", "lvl": "INFO", "pnr": 0, "nr": 3023, "name": "Output power", "short": "Pout", "unit": "kW", "fmt": "FLOAT"},
        {"fam": "xt", "lvl": "BASIC", "pnr": 1100, "nr": 1107, "name": "Maximum current of AC source", "short": "ACinCurr", "unit": "Aac", "fmt": "FLOAT", "def": 32.0, "min": 2.0, "max": 50.0, "inc": 2.0},
        {"fam": "xt", "lvl": "EXPERT", "pnr": 1100, "nr": 1109, "name": "Battery undervoltage", "unit": "Vdc", "fmt": "FLOAT", "def": "S"},
        {"fam": "rcc", "lvl": "VO", "pnr": 0, "nr": 5012, "name": "User level", "unit": "", "fmt": "INT32"},
        {"fam": "xt", "lvl": "BASIC", "pnr": 1100, "nr": 1552, "name": "Operating mode", "unit": "", "fmt": "SHORT_ENUM", "opt": {"1": "Slave", "2": "Master"}},
        {"fam": "xt", "lvl": "INFO", "nr": 9999, "name": "Broken entry without pnr"},
        {"nr": 1, "name": "Broken entry without family"}
    ]"#;

    const CATALOG_120V: &str = r#"[
        {"fam": "xt", "lvl": "BASIC", "pnr": 1100, "nr": 1107, "name": "Maximum current of AC source", "short": "ACinCurr", "unit": "Aac", "fmt": "FLOAT", "def": 16.0, "min": 2.0, "max": 25.0, "inc": 2.0}
    ]"#;

    #[test]
    fn test_catalog_parse_skips_invalid_records() {
        let dataset = XcomDataset::from_json(XcomVoltage::Ac240, CATALOG_240V, CATALOG_120V).unwrap();
        assert_eq!(dataset.len(), 5);
        assert!(dataset.get_by_nr(9999, None).is_err());
    }

    #[test]
    fn test_lookup_and_category() {
        let dataset = XcomDataset::from_json(XcomVoltage::Ac240, CATALOG_240V, CATALOG_120V).unwrap();

        let info = dataset.get_by_nr(3023, None).unwrap();
        assert_eq!(info.category(), XcomCategory::Info);
        assert_eq!(info.object_type(), ObjectType::Info);
        assert_eq!(info.format, XcomFormat::Float);

        let param = dataset.get_by_nr(1107, Some("xt")).unwrap();
        assert_eq!(param.category(), XcomCategory::Parameter);
        assert_eq!(param.object_type(), ObjectType::Parameter);
        assert_eq!(param.default, Some(DatapointBound::Value(32.0)));

        // view-only entries are parameters too
        let vo = dataset.get_by_nr(5012, None).unwrap();
        assert_eq!(vo.category(), XcomCategory::Parameter);

        let signal = dataset.get_by_nr(1109, None).unwrap();
        assert_eq!(signal.default, Some(DatapointBound::Signal));

        assert!(dataset.get_by_nr(3023, Some("vt")).is_err());
        assert!(dataset.get_by_name("Output power", Some("xt")).is_ok());
        assert!(dataset.get_by_name("No such name", None).is_err());
    }

    #[test]
    fn test_menu_items() {
        let dataset = XcomDataset::from_json(XcomVoltage::Ac240, CATALOG_240V, CATALOG_120V).unwrap();
        let items = dataset.menu_items(1100, Some("xt"));
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|p| p.parent == 1100));
    }

    #[test]
    fn test_120vac_overrides_replace_base_entries() {
        let dataset = XcomDataset::from_json(XcomVoltage::Ac120, CATALOG_240V, CATALOG_120V).unwrap();
        assert_eq!(dataset.len(), 5);

        let param = dataset.get_by_nr(1107, Some("xt")).unwrap();
        assert_eq!(param.default, Some(DatapointBound::Value(16.0)));
        assert_eq!(param.max, Some(DatapointBound::Value(25.0)));
    }

    #[test]
    fn test_option_labels() {
        let dataset = XcomDataset::from_json(XcomVoltage::Ac240, CATALOG_240V, CATALOG_120V).unwrap();
        let modes = dataset.get_by_nr(1552, None).unwrap();
        assert_eq!(modes.option_label(2), Some("Master"));
        assert_eq!(modes.option_label(9), None);
    }
}
