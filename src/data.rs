//! Payload codecs for the aggregated services: multi-info request/response
//! items and the RCC message response.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};

use crate::constants::AggregationType;
use crate::error::{XcomError, XcomResult};

/// One (datapoint nr, aggregation selector) pair of a multi-info request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiInfoReqItem {
    pub user_info_ref: u16,
    pub aggregation_type: AggregationType,
}

/// Multi-info request payload: a flat list of 3-byte items
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MultiInfoReq {
    pub items: Vec<MultiInfoReqItem>,
}

impl MultiInfoReq {
    pub fn new(items: Vec<MultiInfoReqItem>) -> Self {
        MultiInfoReq { items }
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.items.len() * 3);
        for item in &self.items {
            buf.put_u16_le(item.user_info_ref);
            buf.put_u8(item.aggregation_type.to_u8());
        }
        buf.to_vec()
    }

    pub fn unpack(buf: &[u8]) -> XcomResult<Self> {
        let mut cursor = Cursor::new(buf);
        let mut remaining = buf.len();
        let mut items = Vec::with_capacity(remaining / 3);

        while remaining >= 3 {
            let user_info_ref = cursor.read_u16::<LittleEndian>()?;
            let aggregation_type = AggregationType::from_u8(cursor.read_u8()?)?;
            remaining -= 3;

            items.push(MultiInfoReqItem {
                user_info_ref,
                aggregation_type,
            });
        }

        Ok(MultiInfoReq { items })
    }
}

/// One item of a multi-info response; the payload is always a 4-byte float
/// regardless of the datapoint's logical format
#[derive(Debug, Clone, PartialEq)]
pub struct MultiInfoRspItem {
    pub user_info_ref: u16,
    pub aggregation_type: AggregationType,
    pub value: f32,
}

/// Multi-info response payload: gateway flags, a timestamp and 7-byte items
#[derive(Debug, Clone, PartialEq)]
pub struct MultiInfoRsp {
    /// Gateway status bits, see [`crate::constants::multi_info_flags`]
    pub flags: u32,
    /// Seconds since the Unix epoch, as stamped by the gateway
    pub datetime: u32,
    pub items: Vec<MultiInfoRspItem>,
}

impl MultiInfoRsp {
    pub fn pack(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(8 + self.items.len() * 7);
        buf.put_u32_le(self.flags);
        buf.put_u32_le(self.datetime);
        for item in &self.items {
            buf.put_u16_le(item.user_info_ref);
            buf.put_u8(item.aggregation_type.to_u8());
            buf.put_f32_le(item.value);
        }
        buf.to_vec()
    }

    pub fn unpack(buf: &[u8]) -> XcomResult<Self> {
        if buf.len() < 8 {
            return Err(XcomError::unpack(format!(
                "Multi-info response too short: {} bytes",
                buf.len()
            )));
        }

        let mut cursor = Cursor::new(buf);
        let flags = cursor.read_u32::<LittleEndian>()?;
        let datetime = cursor.read_u32::<LittleEndian>()?;

        let mut remaining = buf.len() - 8;
        let mut items = Vec::with_capacity(remaining / 7);
        while remaining >= 7 {
            let user_info_ref = cursor.read_u16::<LittleEndian>()?;
            let aggregation_type = AggregationType::from_u8(cursor.read_u8()?)?;
            let value = cursor.read_f32::<LittleEndian>()?;
            remaining -= 7;

            items.push(MultiInfoRspItem {
                user_info_ref,
                aggregation_type,
                value,
            });
        }

        Ok(MultiInfoRsp {
            flags,
            datetime,
            items,
        })
    }

    /// The gateway timestamp as UTC wall time
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.datetime), 0)
    }
}

/// Response payload of a READ on the MESSAGE object type (18 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRsp {
    /// Number of messages pending on the RCC
    pub message_total: u32,
    /// Message definition number, resolvable through the message catalog
    pub message_number: u16,
    /// Bus address of the device that raised the message
    pub source_address: u32,
    /// Seconds since the Unix epoch
    pub timestamp: u32,
    pub value: i32,
}

impl MessageRsp {
    pub const LENGTH: usize = 4 + 2 + 4 + 4 + 4;

    pub fn pack(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(Self::LENGTH);
        buf.put_u32_le(self.message_total);
        buf.put_u16_le(self.message_number);
        buf.put_u32_le(self.source_address);
        buf.put_u32_le(self.timestamp);
        buf.put_i32_le(self.value);
        buf.to_vec()
    }

    pub fn unpack(buf: &[u8]) -> XcomResult<Self> {
        if buf.len() != Self::LENGTH {
            return Err(XcomError::unpack(format!(
                "Expected {} bytes for message response, got {}",
                Self::LENGTH,
                buf.len()
            )));
        }

        let mut cursor = Cursor::new(buf);
        Ok(MessageRsp {
            message_total: cursor.read_u32::<LittleEndian>()?,
            message_number: cursor.read_u16::<LittleEndian>()?,
            source_address: cursor.read_u32::<LittleEndian>()?,
            timestamp: cursor.read_u32::<LittleEndian>()?,
            value: cursor.read_i32::<LittleEndian>()?,
        })
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.timestamp), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_info_req_round_trip() {
        let req = MultiInfoReq::new(vec![
            MultiInfoReqItem {
                user_info_ref: 3031,
                aggregation_type: AggregationType::Master,
            },
            MultiInfoReqItem {
                user_info_ref: 3032,
                aggregation_type: AggregationType::Device(1),
            },
        ]);

        let buf = req.pack();
        assert_eq!(buf.len(), req.items.len() * 3);

        let clone = MultiInfoReq::unpack(&buf).unwrap();
        assert_eq!(clone, req);
    }

    #[test]
    fn test_multi_info_req_rejects_bad_selector() {
        // 0x42 is not a valid aggregation selector
        assert!(MultiInfoReq::unpack(&[0xD7, 0x0B, 0x42]).is_err());
    }

    #[test]
    fn test_multi_info_rsp_round_trip() {
        let rsp = MultiInfoRsp {
            flags: 123,
            datetime: 456,
            items: vec![
                MultiInfoRspItem {
                    user_info_ref: 3031,
                    aggregation_type: AggregationType::Master,
                    value: 7.8,
                },
                MultiInfoRspItem {
                    user_info_ref: 3032,
                    aggregation_type: AggregationType::Sum,
                    value: -1.5,
                },
            ],
        };

        let buf = rsp.pack();
        assert_eq!(buf.len(), rsp.items.len() * 7 + 8);

        let clone = MultiInfoRsp::unpack(&buf).unwrap();
        assert_eq!(clone.flags, rsp.flags);
        assert_eq!(clone.datetime, rsp.datetime);
        assert_eq!(clone.items.len(), rsp.items.len());
        for (a, b) in clone.items.iter().zip(rsp.items.iter()) {
            assert_eq!(a.user_info_ref, b.user_info_ref);
            assert_eq!(a.aggregation_type, b.aggregation_type);
            assert!((a.value - b.value).abs() < 0.01);
        }
    }

    #[test]
    fn test_message_rsp_round_trip() {
        let rsp = MessageRsp {
            message_total: 10,
            message_number: 1,
            source_address: 101,
            timestamp: 1_700_000_000,
            value: 1234,
        };

        let buf = rsp.pack();
        assert_eq!(buf.len(), 18);

        let clone = MessageRsp::unpack(&buf).unwrap();
        assert_eq!(clone, rsp);
        assert!(clone.timestamp().is_some());

        assert!(MessageRsp::unpack(&buf[..17]).is_err());
    }
}
