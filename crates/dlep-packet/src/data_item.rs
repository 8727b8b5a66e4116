use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use ipnet::IpNet;
use nom::combinator::{map, rest};
use nom::error::{ErrorKind, make_error};
use nom::multi::many0;
use nom::number::complete::{be_u8, be_u16, be_u32, be_u64, be_u128};
use nom::{IResult, Parser};

use crate::error::DlepParseError;
use crate::mac::DlepMac;
use crate::parse_be::ParseBe;
use crate::protocfg::{DataItemIdType, DataItemInfo, DataItemType, ProtocolConfig};

bitflags! {
    /// Flags octet carried by IP address data items.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IpFlags: u8 {
        const ADD = 0x01;
    }
}

impl ParseBe<IpFlags> for IpFlags {
    fn parse_be(input: &[u8]) -> IResult<&[u8], IpFlags> {
        map(be_u8, IpFlags::from_bits_truncate).parse(input)
    }
}

/// Decoded value of a data item.  The wire layout for an id comes from the
/// catalogue; the value itself is dynamically typed.
#[derive(Debug, Clone, PartialEq)]
pub enum DataItemValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Text(String),
    Mac(DlepMac),
    Addr { flags: IpFlags, net: IpNet },
    ExtensionList(Vec<u16>),
    Status { code: u8, text: String },
    Opaque(Vec<u8>),
}

impl std::fmt::Display for DataItemValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataItemValue::U8(v) => write!(f, "{}", v),
            DataItemValue::U16(v) => write!(f, "{}", v),
            DataItemValue::U32(v) => write!(f, "{}", v),
            DataItemValue::U64(v) => write!(f, "{}", v),
            DataItemValue::Text(s) => write!(f, "{}", s),
            DataItemValue::Mac(mac) => write!(f, "{}", mac),
            DataItemValue::Addr { flags, net } => {
                let op = if flags.contains(IpFlags::ADD) {
                    "add"
                } else {
                    "drop"
                };
                write!(f, "{} {}", op, net)
            }
            DataItemValue::ExtensionList(exts) => {
                let strs: Vec<String> = exts.iter().map(|e| e.to_string()).collect();
                write!(f, "{}", strs.join(","))
            }
            DataItemValue::Status { code, text } => {
                if text.is_empty() {
                    write!(f, "status={}", code)
                } else {
                    write!(f, "status={} {}", code, text)
                }
            }
            DataItemValue::Opaque(bytes) => {
                for byte in bytes {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

/// A tagged value exchanged on the wire and stored in the information base.
#[derive(Debug, Clone, PartialEq)]
pub struct DataItem {
    pub id: DataItemIdType,
    pub value: DataItemValue,
}

impl DataItem {
    pub fn new(id: DataItemIdType, value: DataItemValue) -> Self {
        DataItem { id, value }
    }

    pub fn name(&self, protocfg: &ProtocolConfig) -> &'static str {
        protocfg.item_name(self.id).unwrap_or("Unknown")
    }

    /// For IP address items: is the address being added (true) or dropped?
    pub fn is_add(&self) -> bool {
        match &self.value {
            DataItemValue::Addr { flags, .. } => flags.contains(IpFlags::ADD),
            _ => false,
        }
    }

    pub fn net(&self) -> Option<IpNet> {
        match &self.value {
            DataItemValue::Addr { net, .. } => Some(*net),
            _ => None,
        }
    }

    /// Two IP data items are IP-equal when they carry the same address and
    /// prefix length, regardless of the add/drop flag.
    pub fn ip_equal(&self, other: &DataItem) -> bool {
        match (self.net(), other.net()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Position of the first IP-equal item in a list, if any.
    pub fn find_ip_data_item(&self, items: &[DataItem]) -> Option<usize> {
        items.iter().position(|di| self.ip_equal(di))
    }

    /// Parse one data item from the front of `input`, returning the rest.
    pub fn parse<'a>(
        input: &'a [u8],
        protocfg: &ProtocolConfig,
    ) -> Result<(&'a [u8], DataItem), DlepParseError> {
        let (input, (id, len)) = item_header(input)?;
        let len = len as usize;
        if input.len() < len {
            return Err(DlepParseError::Truncated {
                needed: len - input.len(),
            });
        }
        let info = protocfg
            .item_info(id)
            .ok_or(DlepParseError::UnknownDataItem { item: id })?;
        let value = parse_value(&input[..len], info)?;
        Ok((&input[len..], DataItem { id, value }))
    }

    /// Append this data item, TLV-encoded, to `buf`.
    pub fn emit(&self, buf: &mut BytesMut) {
        buf.put_u16(self.id);
        let len_pos = buf.len();
        buf.put_u16(0);
        match &self.value {
            DataItemValue::U8(v) => buf.put_u8(*v),
            DataItemValue::U16(v) => buf.put_u16(*v),
            DataItemValue::U32(v) => buf.put_u32(*v),
            DataItemValue::U64(v) => buf.put_u64(*v),
            DataItemValue::Text(s) => buf.put_slice(s.as_bytes()),
            DataItemValue::Mac(mac) => buf.put_slice(&mac.octets()),
            DataItemValue::Addr { flags, net } => {
                buf.put_u8(flags.bits());
                match net.addr() {
                    IpAddr::V4(v4) => buf.put_slice(&v4.octets()),
                    IpAddr::V6(v6) => buf.put_slice(&v6.octets()),
                }
                if net.prefix_len() != net.max_prefix_len() {
                    buf.put_u8(net.prefix_len());
                }
            }
            DataItemValue::ExtensionList(exts) => {
                for ext in exts {
                    buf.put_u16(*ext);
                }
            }
            DataItemValue::Status { code, text } => {
                buf.put_u8(*code);
                buf.put_slice(text.as_bytes());
            }
            DataItemValue::Opaque(bytes) => buf.put_slice(bytes),
        }
        let len = (buf.len() - len_pos - 2) as u16;
        BigEndian::write_u16(&mut buf[len_pos..len_pos + 2], len);
    }
}

impl std::fmt::Display for DataItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "item {} {}", self.id, self.value)
    }
}

fn item_header(input: &[u8]) -> IResult<&[u8], (u16, u16)> {
    let (input, id) = be_u16(input)?;
    let (input, len) = be_u16(input)?;
    Ok((input, (id, len)))
}

fn parse_u8_value(input: &[u8]) -> IResult<&[u8], DataItemValue> {
    map(be_u8, DataItemValue::U8).parse(input)
}

fn parse_u16_value(input: &[u8]) -> IResult<&[u8], DataItemValue> {
    map(be_u16, DataItemValue::U16).parse(input)
}

fn parse_u32_value(input: &[u8]) -> IResult<&[u8], DataItemValue> {
    map(be_u32, DataItemValue::U32).parse(input)
}

fn parse_u64_value(input: &[u8]) -> IResult<&[u8], DataItemValue> {
    map(be_u64, DataItemValue::U64).parse(input)
}

fn parse_text(input: &[u8]) -> IResult<&[u8], DataItemValue> {
    let (input, bytes) = rest(input)?;
    Ok((
        input,
        DataItemValue::Text(String::from_utf8_lossy(bytes).to_string()),
    ))
}

fn parse_mac_value(input: &[u8]) -> IResult<&[u8], DataItemValue> {
    map(DlepMac::parse_be, DataItemValue::Mac).parse(input)
}

/// Flags octet, then a 4- or 16-byte address with an optional trailing
/// prefix length.  The value length decides the layout.
fn parse_addr(input: &[u8]) -> IResult<&[u8], (IpFlags, IpAddr, u8)> {
    let (input, flags) = IpFlags::parse_be(input)?;
    match input.len() {
        4 => {
            let (input, bits) = be_u32(input)?;
            Ok((input, (flags, IpAddr::V4(Ipv4Addr::from(bits)), 32)))
        }
        5 => {
            let (input, bits) = be_u32(input)?;
            let (input, prefix) = be_u8(input)?;
            Ok((input, (flags, IpAddr::V4(Ipv4Addr::from(bits)), prefix)))
        }
        16 => {
            let (input, bits) = be_u128(input)?;
            Ok((input, (flags, IpAddr::V6(Ipv6Addr::from(bits)), 128)))
        }
        17 => {
            let (input, bits) = be_u128(input)?;
            let (input, prefix) = be_u8(input)?;
            Ok((input, (flags, IpAddr::V6(Ipv6Addr::from(bits)), prefix)))
        }
        _ => Err(nom::Err::Error(make_error(input, ErrorKind::LengthValue))),
    }
}

fn parse_extension_list(input: &[u8]) -> IResult<&[u8], DataItemValue> {
    map(many0(be_u16), DataItemValue::ExtensionList).parse(input)
}

fn parse_status(input: &[u8]) -> IResult<&[u8], DataItemValue> {
    let (input, code) = be_u8(input)?;
    let (input, text) = rest(input)?;
    Ok((
        input,
        DataItemValue::Status {
            code,
            text: String::from_utf8_lossy(text).to_string(),
        },
    ))
}

fn parse_opaque(input: &[u8]) -> IResult<&[u8], DataItemValue> {
    let (input, bytes) = rest(input)?;
    Ok((input, DataItemValue::Opaque(bytes.to_vec())))
}

/// Decode a value slice according to the catalogue layout for its id.  The
/// parser must consume the slice exactly.
fn parse_value(input: &[u8], info: &DataItemInfo) -> Result<DataItemValue, DlepParseError> {
    let len = input.len();
    let bad_len = || DlepParseError::InvalidItemLength {
        name: info.name,
        len,
    };

    let (remainder, value) = match info.typ {
        DataItemType::U8 => parse_u8_value(input).map_err(|_| bad_len())?,
        DataItemType::U16 => parse_u16_value(input).map_err(|_| bad_len())?,
        DataItemType::U32 => parse_u32_value(input).map_err(|_| bad_len())?,
        DataItemType::U64 => parse_u64_value(input).map_err(|_| bad_len())?,
        DataItemType::Text => parse_text(input).map_err(|_| bad_len())?,
        DataItemType::Mac => parse_mac_value(input).map_err(|_| bad_len())?,
        DataItemType::Addr => {
            let (remainder, (flags, addr, prefix)) = parse_addr(input).map_err(|_| bad_len())?;
            let net = IpNet::new(addr, prefix).map_err(|_| DlepParseError::InvalidPrefix {
                name: info.name,
                prefix,
            })?;
            (remainder, DataItemValue::Addr { flags, net })
        }
        DataItemType::ExtensionList => parse_extension_list(input).map_err(|_| bad_len())?,
        DataItemType::Status => parse_status(input).map_err(|_| bad_len())?,
        DataItemType::Opaque => parse_opaque(input).map_err(|_| bad_len())?,
    };
    if !remainder.is_empty() {
        return Err(bad_len());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocfg::strings;

    fn ipv4_item(protocfg: &ProtocolConfig, addr: &str, add: bool) -> DataItem {
        let flags = if add { IpFlags::ADD } else { IpFlags::empty() };
        DataItem::new(
            protocfg.item_id(strings::IPV4_ADDRESS),
            DataItemValue::Addr {
                flags,
                net: addr.parse().unwrap(),
            },
        )
    }

    #[test]
    fn addr_item_roundtrip() {
        let protocfg = ProtocolConfig::default_config();
        let item = ipv4_item(&protocfg, "10.0.0.5/32", true);
        let mut buf = BytesMut::new();
        item.emit(&mut buf);
        // id + len + flags + 4 address octets, no prefix octet for /32
        assert_eq!(buf.len(), 4 + 5);
        let (rest, parsed) = DataItem::parse(&buf, &protocfg).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, item);
        assert!(parsed.is_add());
    }

    #[test]
    fn subnet_item_roundtrip() {
        let protocfg = ProtocolConfig::default_config();
        let item = DataItem::new(
            protocfg.item_id(strings::IPV4_ATTACHED_SUBNET),
            DataItemValue::Addr {
                flags: IpFlags::empty(),
                net: "192.168.0.0/24".parse().unwrap(),
            },
        );
        let mut buf = BytesMut::new();
        item.emit(&mut buf);
        assert_eq!(buf.len(), 4 + 6);
        let (rest, parsed) = DataItem::parse(&buf, &protocfg).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, item);
        assert!(!parsed.is_add());
    }

    #[test]
    fn ip_equal_ignores_flags() {
        let protocfg = ProtocolConfig::default_config();
        let add = ipv4_item(&protocfg, "10.0.0.5/32", true);
        let drop = ipv4_item(&protocfg, "10.0.0.5/32", false);
        let other = ipv4_item(&protocfg, "10.0.0.6/32", true);
        assert!(add.ip_equal(&drop));
        assert!(!add.ip_equal(&other));
        assert_eq!(add.find_ip_data_item(&[other.clone(), drop.clone()]), Some(1));
        assert_eq!(add.find_ip_data_item(&[other]), None);
    }

    #[test]
    fn metric_item_roundtrip() {
        let protocfg = ProtocolConfig::default_config();
        let item = DataItem::new(
            protocfg.item_id(strings::LATENCY),
            DataItemValue::U64(5000),
        );
        let mut buf = BytesMut::new();
        item.emit(&mut buf);
        let (_, parsed) = DataItem::parse(&buf, &protocfg).unwrap();
        assert_eq!(parsed, item);
    }

    #[test]
    fn opaque_item_roundtrip() {
        let protocfg = ProtocolConfig::default_config();
        let item = DataItem::new(
            protocfg.item_id(strings::EXPERIMENTAL_DEFINITION),
            DataItemValue::Opaque(vec![0xde, 0xad, 0xbe, 0xef]),
        );
        let mut buf = BytesMut::new();
        item.emit(&mut buf);
        let (rest, parsed) = DataItem::parse(&buf, &protocfg).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, item);
        assert_eq!(parsed.value.to_string(), "deadbeef");
    }

    #[test]
    fn unknown_item_rejected() {
        let protocfg = ProtocolConfig::default_config();
        let buf: &[u8] = &[0xff, 0xfe, 0x00, 0x01, 0x42];
        assert!(matches!(
            DataItem::parse(buf, &protocfg),
            Err(DlepParseError::UnknownDataItem { item: 0xfffe })
        ));
    }

    #[test]
    fn bad_length_rejected() {
        let protocfg = ProtocolConfig::default_config();
        // Latency declared as u64 but only two value bytes.
        let buf: &[u8] = &[0x00, 0x10, 0x00, 0x02, 0x01, 0x02];
        assert!(matches!(
            DataItem::parse(buf, &protocfg),
            Err(DlepParseError::InvalidItemLength { .. })
        ));
        // Trailing garbage behind a fixed-size value is rejected too.
        let buf: &[u8] = &[0x00, 0x11, 0x00, 0x02, 0x01, 0x02];
        assert!(matches!(
            DataItem::parse(buf, &protocfg),
            Err(DlepParseError::InvalidItemLength { .. })
        ));
    }
}
