//! Aggregate request/result types for multi-datapoint reads.
//!
//! An [`XcomValuesItem`] pairs a datapoint with the device it should be
//! read from. The target can be given as a device code, a bus address or an
//! aggregation selector; it is resolved once, at construction, into a
//! canonical (code, address, selector) triple. Code trumps address, address
//! trumps selector.

use crate::constants::AggregationType;
use crate::data::{MultiInfoReq, MultiInfoReqItem, MultiInfoRsp};
use crate::datapoints::XcomDatapoint;
use crate::error::{XcomError, XcomResult};
use crate::families::{DeviceSelector, XcomDeviceFamilies};
use crate::value::{self, XcomValue};

/// One datapoint/device pair, carrying the value or error after execution.
///
/// A finished item exposes `value` or `error` but never both.
#[derive(Debug, Clone)]
pub struct XcomValuesItem {
    pub datapoint: XcomDatapoint,
    /// The target exactly as the caller expressed it
    pub selector: DeviceSelector,
    /// Device code, when the target names a single device
    pub code: Option<String>,
    /// Bus address, when the target names a single device
    pub address: Option<u32>,
    /// Resolved aggregation selector
    pub aggregation: AggregationType,
    /// Only set in responses
    pub value: Option<XcomValue>,
    /// Only set in responses
    pub error: Option<String>,
}

impl XcomValuesItem {
    /// Resolve a caller-supplied target into a canonical item.
    ///
    /// Unresolvable codes or addresses fail here, before any wire traffic.
    pub fn new(
        datapoint: XcomDatapoint,
        selector: impl Into<DeviceSelector>,
        families: &XcomDeviceFamilies,
    ) -> XcomResult<Self> {
        let selector = selector.into();

        let (code, address, aggregation) = match &selector {
            DeviceSelector::Code(code) => {
                let address = families.address_by_code(code)?;
                let aggregation = families.aggregation_by_code(code)?;
                (Some(code.clone()), Some(address), aggregation)
            }
            DeviceSelector::Address(addr) => {
                let code = families.code_by_address(*addr, &datapoint.family_id)?;
                let aggregation = families.aggregation_by_address(*addr)?;
                (Some(code), Some(*addr), aggregation)
            }
            DeviceSelector::Aggregation(aggr) => {
                let code = families.code_by_aggregation(*aggr, &datapoint.family_id);
                let address = families.address_by_aggregation(*aggr, &datapoint.family_id);
                (code, address, *aggr)
            }
        };

        Ok(XcomValuesItem {
            datapoint,
            selector,
            code,
            address,
            aggregation,
            value: None,
            error: None,
        })
    }

    /// Human-readable target: the device code when there is one, otherwise
    /// the aggregation selector name
    pub fn target_name(&self) -> String {
        self.code
            .clone()
            .unwrap_or_else(|| self.aggregation.to_string())
    }
}

/// A batch of items, plus the gateway status fields of a multi-info
/// response once one has been received
#[derive(Debug, Clone, Default)]
pub struct XcomValues {
    pub items: Vec<XcomValuesItem>,
    /// Gateway status bits from the last multi-info response
    pub flags: Option<u32>,
    /// Gateway timestamp from the last multi-info response
    pub datetime: Option<u32>,
}

impl XcomValues {
    pub fn new(items: Vec<XcomValuesItem>) -> Self {
        XcomValues {
            items,
            flags: None,
            datetime: None,
        }
    }

    /// Assemble the multi-info request payload for a set of items
    pub fn pack_request(items: &[XcomValuesItem]) -> Vec<u8> {
        MultiInfoReq::new(
            items
                .iter()
                .map(|item| MultiInfoReqItem {
                    user_info_ref: item.datapoint.nr as u16,
                    aggregation_type: item.aggregation,
                })
                .collect(),
        )
        .pack()
    }

    /// Decode a multi-info response payload against the request items.
    ///
    /// Each response value arrives as a raw float and is cast back to the
    /// datapoint's logical format. Response items that match none of the
    /// request items are dropped.
    pub fn unpack_response(buf: &[u8], request_items: &[XcomValuesItem]) -> XcomResult<Self> {
        let rsp = MultiInfoRsp::unpack(buf)?;

        let mut items = Vec::with_capacity(rsp.items.len());
        for rsp_item in &rsp.items {
            let Some(req_item) = request_items
                .iter()
                .find(|i| i.datapoint.nr == u32::from(rsp_item.user_info_ref))
            else {
                continue;
            };

            let mut item = req_item.clone();
            item.aggregation = rsp_item.aggregation_type;
            item.value = Some(value::cast(rsp_item.value, req_item.datapoint.format)?);
            item.error = None;
            items.push(item);
        }

        Ok(XcomValues {
            items,
            flags: Some(rsp.flags),
            datetime: Some(rsp.datetime),
        })
    }

    /// Decode a multi-info request payload back into items. Used by test
    /// harnesses playing the gateway side.
    pub fn unpack_request(
        buf: &[u8],
        dataset: &crate::datapoints::XcomDataset,
        families: &XcomDeviceFamilies,
    ) -> XcomResult<Self> {
        let req = MultiInfoReq::unpack(buf)?;

        let mut items = Vec::with_capacity(req.items.len());
        for item in &req.items {
            let datapoint = dataset.get_by_nr(u32::from(item.user_info_ref), None)?.clone();
            items.push(XcomValuesItem::new(
                datapoint,
                item.aggregation_type,
                families,
            )?);
        }

        Ok(XcomValues::new(items))
    }

    /// Assemble a multi-info response payload from finished items. Used by
    /// test harnesses playing the gateway side.
    pub fn pack_response(&self) -> XcomResult<Vec<u8>> {
        let mut rsp_items = Vec::with_capacity(self.items.len());
        for item in &self.items {
            let value = item
                .value
                .as_ref()
                .and_then(XcomValue::as_f64)
                .ok_or_else(|| {
                    XcomError::invalid_parameter(format!(
                        "Item {} has no numeric value to pack",
                        item.datapoint.nr
                    ))
                })?;

            rsp_items.push(crate::data::MultiInfoRspItem {
                user_info_ref: item.datapoint.nr as u16,
                aggregation_type: item.aggregation,
                value: value as f32,
            });
        }

        Ok(MultiInfoRsp {
            flags: self.flags.unwrap_or(0),
            datetime: self.datetime.unwrap_or(0),
            items: rsp_items,
        }
        .pack())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{XcomLevel, AggregationType};
    use crate::datapoints::XcomDataset;
    use crate::value::XcomFormat;

    fn info(nr: u32, format: XcomFormat) -> XcomDatapoint {
        XcomDatapoint::new(nr, &format!("Info {nr}"), "xt", XcomLevel::Info, format, "")
    }

    #[test]
    fn test_item_resolution_from_code() {
        let families = XcomDeviceFamilies::new();
        let item = XcomValuesItem::new(info(3023, XcomFormat::Float), "XT1", &families).unwrap();

        assert_eq!(item.code.as_deref(), Some("XT1"));
        assert_eq!(item.address, Some(101));
        assert_eq!(item.aggregation, AggregationType::Device(1));
        assert_eq!(item.target_name(), "XT1");
    }

    #[test]
    fn test_item_resolution_from_address() {
        let families = XcomDeviceFamilies::new();
        let item = XcomValuesItem::new(info(3023, XcomFormat::Float), 103u32, &families).unwrap();

        assert_eq!(item.code.as_deref(), Some("XT3"));
        assert_eq!(item.address, Some(103));
        assert_eq!(item.aggregation, AggregationType::Device(3));
    }

    #[test]
    fn test_item_resolution_from_aggregation() {
        let families = XcomDeviceFamilies::new();

        let item =
            XcomValuesItem::new(info(3023, XcomFormat::Float), AggregationType::Device(2), &families)
                .unwrap();
        assert_eq!(item.code.as_deref(), Some("XT2"));
        assert_eq!(item.address, Some(102));

        let item =
            XcomValuesItem::new(info(3023, XcomFormat::Float), AggregationType::Sum, &families)
                .unwrap();
        assert_eq!(item.code, None);
        assert_eq!(item.address, None);
        assert_eq!(item.aggregation, AggregationType::Sum);
        assert_eq!(item.target_name(), "SUM");
    }

    #[test]
    fn test_item_resolution_rejects_unknown_targets() {
        let families = XcomDeviceFamilies::new();
        assert!(XcomValuesItem::new(info(3023, XcomFormat::Float), "XT77", &families).is_err());
        assert!(XcomValuesItem::new(info(3023, XcomFormat::Float), 9999u32, &families).is_err());
    }

    #[test]
    fn test_request_response_payload_round_trip() {
        let families = XcomDeviceFamilies::new();
        let dataset = XcomDataset::from_datapoints(vec![
            info(3021, XcomFormat::Float),
            info(3028, XcomFormat::ShortEnum),
        ]);

        let request_items = vec![
            XcomValuesItem::new(dataset.get_by_nr(3021, None).unwrap().clone(), "XT1", &families)
                .unwrap(),
            XcomValuesItem::new(
                dataset.get_by_nr(3028, None).unwrap().clone(),
                AggregationType::Device(2),
                &families,
            )
            .unwrap(),
        ];

        let buf = XcomValues::pack_request(&request_items);
        assert_eq!(buf.len(), request_items.len() * 3);

        // the gateway side can reconstruct the request
        let parsed = XcomValues::unpack_request(&buf, &dataset, &families).unwrap();
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.items[0].datapoint.nr, 3021);
        assert_eq!(parsed.items[1].aggregation, AggregationType::Device(2));

        // build a response and decode it; values are cast to logical formats
        let mut response = parsed;
        response.flags = Some(0x20);
        response.datetime = Some(456);
        response.items[0].value = Some(XcomValue::Float(12.3));
        response.items[1].value = Some(XcomValue::Float(2.0));
        let rsp_buf = response.pack_response().unwrap();

        let decoded = XcomValues::unpack_response(&rsp_buf, &request_items).unwrap();
        assert_eq!(decoded.flags, Some(0x20));
        assert_eq!(decoded.datetime, Some(456));
        assert_eq!(decoded.items.len(), 2);
        match decoded.items[0].value {
            Some(XcomValue::Float(v)) => assert!((v - 12.3).abs() < 0.01),
            ref other => panic!("unexpected value {other:?}"),
        }
        // SHORT_ENUM came over the wire as a float but is cast back
        assert_eq!(decoded.items[1].value, Some(XcomValue::UInt16(2)));
        assert!(decoded.items.iter().all(|i| i.error.is_none()));
    }

    #[test]
    fn test_unmatched_response_items_are_dropped() {
        let families = XcomDeviceFamilies::new();
        let request_items =
            vec![XcomValuesItem::new(info(3021, XcomFormat::Float), "XT1", &families).unwrap()];

        let rsp = MultiInfoRsp {
            flags: 0,
            datetime: 0,
            items: vec![
                crate::data::MultiInfoRspItem {
                    user_info_ref: 3021,
                    aggregation_type: AggregationType::Device(1),
                    value: 1.0,
                },
                crate::data::MultiInfoRspItem {
                    user_info_ref: 3999,
                    aggregation_type: AggregationType::Device(1),
                    value: 2.0,
                },
            ],
        };

        let decoded = XcomValues::unpack_response(&rsp.pack(), &request_items).unwrap();
        assert_eq!(decoded.items.len(), 1);
        assert_eq!(decoded.items[0].datapoint.nr, 3021);
    }
}
