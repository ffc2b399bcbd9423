//! Xcom package codec: the three-layer binary envelope exchanged with the
//! gateway.
//!
//! A package on the wire is:
//!
//! ```text
//! 0xAA | header (11 bytes) | header checksum (2) | frame (data_length bytes) | frame checksum (2)
//! ```
//!
//! Header and frame are each protected by their own running checksum; a
//! mismatch fails the parse rather than being silently accepted. The wire
//! occasionally prefixes noise bytes (0xFF is common), so parsing scavenges
//! forward to the start byte.

use std::fmt;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::constants::{error_name, ObjectType, PropertyId, ServiceId};
use crate::error::{XcomError, XcomResult};
use crate::value::{self, XcomFormat, XcomValue};

/// Start marker of every package
pub const START_BYTE: u8 = 0xAA;

/// Bit 0 of service_flags: response carries an error payload
const FLAG_IS_ERROR: u8 = 0x01;

/// Bit 1 of service_flags: package is a response
const FLAG_IS_RESPONSE: u8 = 0x02;

/// Running checksum over a serialized header or frame region.
///
/// Two accumulators: A starts at 0xFF, B at 0x00; for every byte
/// A = (A + byte) mod 256 and B = (B + A) mod 256. The wire carries (A, B).
pub fn checksum(data: &[u8]) -> [u8; 2] {
    let mut a: u8 = 0xFF;
    let mut b: u8 = 0x00;

    for &byte in data {
        a = a.wrapping_add(byte);
        b = b.wrapping_add(a);
    }

    [a, b]
}

/// Innermost layer: object addressing plus the property payload
#[derive(Debug, Clone, PartialEq)]
pub struct XcomService {
    pub object_type: u16,
    pub object_id: u32,
    pub property_id: u16,
    pub property_data: Vec<u8>,
}

impl XcomService {
    fn parse(buf: &[u8]) -> XcomResult<Self> {
        if buf.len() < 8 {
            return Err(XcomError::frame(format!(
                "Service region too short: {} bytes",
                buf.len()
            )));
        }

        let mut cursor = Cursor::new(buf);
        let object_type = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)?;
        let object_id = ReadBytesExt::read_u32::<LittleEndian>(&mut cursor)?;
        let property_id = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)?;
        let property_data = buf[8..].to_vec();

        Ok(XcomService {
            object_type,
            object_id,
            property_id,
            property_data,
        })
    }

    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.object_type);
        buf.put_u32_le(self.object_id);
        buf.put_u16_le(self.property_id);
        buf.put_slice(&self.property_data);
    }

    fn byte_len(&self) -> usize {
        2 + 4 + 2 + self.property_data.len()
    }
}

impl fmt::Display for XcomService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Service(obj_type={:04X}, obj_id={}, property_id={:02X}, property_data={})",
            self.object_type,
            self.object_id,
            self.property_id,
            hex::encode(&self.property_data)
        )
    }
}

/// Middle layer: service flags and id wrapping the service payload
#[derive(Debug, Clone, PartialEq)]
pub struct XcomFrame {
    pub service_flags: u8,
    pub service_id: u8,
    pub service_data: XcomService,
}

impl XcomFrame {
    fn parse(buf: &[u8]) -> XcomResult<Self> {
        if buf.len() < 2 {
            return Err(XcomError::frame(format!(
                "Frame region too short: {} bytes",
                buf.len()
            )));
        }

        Ok(XcomFrame {
            service_flags: buf[0],
            service_id: buf[1],
            service_data: XcomService::parse(&buf[2..])?,
        })
    }

    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.service_flags);
        buf.put_u8(self.service_id);
        self.service_data.write_to(buf);
    }

    /// Serialized length, the value carried in the header's data_length
    pub fn byte_len(&self) -> usize {
        2 + self.service_data.byte_len()
    }
}

impl fmt::Display for XcomFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame(flags={:01X}, id={:01X}, service={})",
            self.service_flags, self.service_id, self.service_data
        )
    }
}

/// Outermost layer: bus addressing and the frame length
#[derive(Debug, Clone, PartialEq)]
pub struct XcomHeader {
    /// Reserved, currently always 0
    pub frame_flags: u8,
    pub src_addr: u32,
    pub dst_addr: u32,
    pub data_length: u16,
}

impl XcomHeader {
    /// Serialized header size
    pub const LENGTH: usize = 1 + 4 + 4 + 2;

    fn parse(buf: &[u8]) -> XcomResult<Self> {
        if buf.len() != Self::LENGTH {
            return Err(XcomError::frame(format!(
                "Header region must be {} bytes, got {}",
                Self::LENGTH,
                buf.len()
            )));
        }

        let mut cursor = Cursor::new(&buf[1..]);
        Ok(XcomHeader {
            frame_flags: buf[0],
            src_addr: ReadBytesExt::read_u32::<LittleEndian>(&mut cursor)?,
            dst_addr: ReadBytesExt::read_u32::<LittleEndian>(&mut cursor)?,
            data_length: ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)?,
        })
    }

    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.frame_flags);
        buf.put_u32_le(self.src_addr);
        buf.put_u32_le(self.dst_addr);
        buf.put_u16_le(self.data_length);
    }
}

impl fmt::Display for XcomHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Header(flags={}, src={}, dst={}, data_length={})",
            self.frame_flags, self.src_addr, self.dst_addr, self.data_length
        )
    }
}

/// The unit of wire exchange with the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct XcomPackage {
    pub header: XcomHeader,
    pub frame: XcomFrame,
}

impl XcomPackage {
    /// Assemble a request package; data_length is computed from the frame.
    pub fn request(
        service_id: ServiceId,
        object_type: ObjectType,
        object_id: u32,
        property_id: PropertyId,
        property_data: Vec<u8>,
        src_addr: u32,
        dst_addr: u32,
    ) -> Self {
        let frame = XcomFrame {
            service_flags: 0,
            service_id: service_id.to_u8(),
            service_data: XcomService {
                object_type: object_type.to_u16(),
                object_id,
                property_id: property_id.to_u16(),
                property_data,
            },
        };
        let header = XcomHeader {
            frame_flags: 0,
            src_addr,
            dst_addr,
            data_length: frame.byte_len() as u16,
        };

        XcomPackage { header, frame }
    }

    /// Serialize the whole package: start byte, header + checksum, frame +
    /// checksum. No trailing delimiter is needed when the package is written
    /// in one piece.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut header = BytesMut::with_capacity(XcomHeader::LENGTH);
        self.header.write_to(&mut header);

        let mut frame = BytesMut::with_capacity(self.frame.byte_len());
        self.frame.write_to(&mut frame);

        let mut buf = BytesMut::with_capacity(1 + header.len() + 2 + frame.len() + 2);
        buf.put_u8(START_BYTE);
        buf.put_slice(&header);
        buf.put_slice(&checksum(&header));
        buf.put_slice(&frame);
        buf.put_slice(&checksum(&frame));

        buf.to_vec()
    }

    /// Read one package from the stream, skipping any noise bytes before the
    /// start marker. Both checksums are verified; a mismatch is a fatal
    /// parse failure, never silently corrected.
    pub async fn parse<R>(reader: &mut R) -> XcomResult<Self>
    where
        R: AsyncRead + Unpin,
    {
        // packages sometimes arrive prefixed with 0xff noise bytes
        let mut skipped = 0usize;
        loop {
            let byte = reader.read_u8().await?;
            if byte == START_BYTE {
                break;
            }
            skipped += 1;
        }
        if skipped > 0 {
            trace!("skipped {skipped} bytes until start byte");
        }

        let mut header_raw = [0u8; XcomHeader::LENGTH];
        reader.read_exact(&mut header_raw).await?;
        let mut header_chk = [0u8; 2];
        reader.read_exact(&mut header_chk).await?;
        if checksum(&header_raw) != header_chk {
            return Err(XcomError::frame(format!(
                "Header checksum mismatch (header={})",
                hex::encode(header_raw)
            )));
        }
        let header = XcomHeader::parse(&header_raw)?;

        let mut frame_raw = vec![0u8; header.data_length as usize];
        reader.read_exact(&mut frame_raw).await?;
        let mut frame_chk = [0u8; 2];
        reader.read_exact(&mut frame_chk).await?;
        if checksum(&frame_raw) != frame_chk {
            return Err(XcomError::frame(format!(
                "Frame checksum mismatch (frame={})",
                hex::encode(&frame_raw)
            )));
        }
        let frame = XcomFrame::parse(&frame_raw)?;

        let package = XcomPackage { header, frame };
        trace!("recv {package}");

        Ok(package)
    }

    /// Parse a package out of a complete in-memory buffer (e.g. a datagram)
    pub async fn parse_bytes(buf: &[u8]) -> XcomResult<Self> {
        let mut slice = buf;
        Self::parse(&mut slice).await
    }

    /// service_flags bit 1
    pub fn is_response(&self) -> bool {
        self.frame.service_flags & FLAG_IS_RESPONSE != 0
    }

    /// service_flags bit 0
    pub fn is_error(&self) -> bool {
        self.frame.service_flags & FLAG_IS_ERROR != 0
    }

    /// Decode the 2-byte SCOM error code of an error-flagged response
    pub fn error_code(&self) -> XcomResult<u16> {
        match value::unpack(&self.frame.service_data.property_data, XcomFormat::Error)? {
            XcomValue::UInt16(code) => Ok(code),
            _ => unreachable!("ERROR format always unpacks to UInt16"),
        }
    }

    /// Name of the carried error code, or `None` when the error flag is
    /// clear. Unrecognized codes render as a hex fallback string.
    pub fn error_text(&self) -> Option<String> {
        if !self.is_error() {
            return None;
        }
        Some(match self.error_code() {
            Ok(code) => error_name(code),
            Err(_) => format!(
                "undecodable error payload '{}'",
                hex::encode(&self.frame.service_data.property_data)
            ),
        })
    }

    /// Response correlation: a response answers a request iff service_id,
    /// object_id and property_id are pairwise equal. Addresses are not
    /// checked; unrelated bus traffic is filtered by this triple alone.
    pub fn matches_request(&self, request: &XcomPackage) -> bool {
        self.frame.service_id == request.frame.service_id
            && self.frame.service_data.object_id == request.frame.service_data.object_id
            && self.frame.service_data.property_id == request.frame.service_data.property_id
    }
}

impl fmt::Display for XcomPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Package(header={}, frame={})", self.header, self.frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{object_id, addr};

    fn read_info_package() -> XcomPackage {
        XcomPackage::request(
            ServiceId::Read,
            ObjectType::Info,
            3023,
            PropertyId::Value,
            vec![],
            addr::SOURCE,
            101,
        )
    }

    fn write_param_package() -> XcomPackage {
        XcomPackage::request(
            ServiceId::Write,
            ObjectType::Parameter,
            1107,
            PropertyId::UnsavedValue,
            value::pack(&XcomValue::Float(4.0), XcomFormat::Float).unwrap(),
            addr::SOURCE,
            101,
        )
    }

    fn multi_info_package() -> XcomPackage {
        XcomPackage::request(
            ServiceId::Read,
            ObjectType::MultiInfo,
            object_id::MULTI_INFO,
            PropertyId::MultiInfo,
            vec![0xD7, 0x0B, 0x01, 0xD8, 0x0B, 0x02],
            addr::SOURCE,
            addr::RCC,
        )
    }

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(&[]), [0xFF, 0x00]);
        assert_eq!(checksum(&[0x01]), [0x00, 0x00]);
        // accumulators wrap modulo 256
        assert_eq!(checksum(&[0xFF, 0xFF]), [0xFD, 0xFB]);
    }

    #[tokio::test]
    async fn test_package_round_trip() {
        for package in [read_info_package(), write_param_package(), multi_info_package()] {
            let buf = package.to_bytes();
            assert_eq!(buf[0], START_BYTE);

            let clone = XcomPackage::parse_bytes(&buf).await.unwrap();
            assert_eq!(clone.header, package.header);
            assert_eq!(clone.frame, package.frame);
        }
    }

    #[tokio::test]
    async fn test_parse_skips_noise_bytes() {
        let package = read_info_package();
        let mut buf = vec![0xFF, 0xFF, 0x00, 0x13];
        buf.extend_from_slice(&package.to_bytes());

        let clone = XcomPackage::parse_bytes(&buf).await.unwrap();
        assert_eq!(clone, package);
    }

    #[tokio::test]
    async fn test_corrupted_byte_fails_parse() {
        let buf = write_param_package().to_bytes();

        // flipping any byte after the start marker must be rejected
        for pos in 1..buf.len() {
            let mut corrupted = buf.clone();
            corrupted[pos] ^= 0x01;
            assert!(
                XcomPackage::parse_bytes(&corrupted).await.is_err(),
                "corruption at byte {pos} was accepted"
            );
        }
    }

    #[tokio::test]
    async fn test_truncated_package_fails_parse() {
        let buf = read_info_package().to_bytes();
        for len in 1..buf.len() {
            assert!(XcomPackage::parse_bytes(&buf[..len]).await.is_err());
        }
    }

    #[test]
    fn test_flags_and_error_text() {
        let mut package = read_info_package();
        assert!(!package.is_response());
        assert!(!package.is_error());
        assert_eq!(package.error_text(), None);

        package.frame.service_flags = 0x02;
        assert!(package.is_response());
        assert!(!package.is_error());

        package.frame.service_flags = 0x03;
        package.frame.service_data.property_data = vec![0x2A, 0x00];
        package.header.data_length = package.frame.byte_len() as u16;
        assert!(package.is_response());
        assert!(package.is_error());
        assert_eq!(package.error_text().unwrap(), "READ_PROPERTY_FAILED");

        package.frame.service_data.property_data = vec![0xDC, 0xFE];
        assert_eq!(package.error_text().unwrap(), "unknown error 'fedc'");
    }

    #[test]
    fn test_correlation_triple() {
        let request = read_info_package();

        let mut response = request.clone();
        response.frame.service_flags = 0x02;
        // reversed addresses and different dst do not matter
        response.header.src_addr = 101;
        response.header.dst_addr = 1;
        assert!(response.matches_request(&request));

        let mut other_object = response.clone();
        other_object.frame.service_data.object_id = 3024;
        assert!(!other_object.matches_request(&request));

        let mut other_property = response.clone();
        other_property.frame.service_data.property_id = PropertyId::UnsavedValue.to_u16();
        assert!(!other_property.matches_request(&request));

        let mut other_service = response;
        other_service.frame.service_id = ServiceId::Write.to_u8();
        assert!(!other_service.matches_request(&request));
    }
}
