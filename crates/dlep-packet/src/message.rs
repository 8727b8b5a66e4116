use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use nom::IResult;
use nom::number::complete::be_u16;

use crate::data_item::{DataItem, DataItemValue, IpFlags};
use crate::error::DlepParseError;
use crate::mac::DlepMac;
use crate::protocfg::{ExtensionIdType, ProtocolConfig, SignalIdType};

/// Signal id plus payload length.
pub const MESSAGE_HEADER_LEN: usize = 4;

/// Largest possible serialized signal: header plus a 16-bit payload.
pub const MAX_SIGNAL_SIZE: usize = MESSAGE_HEADER_LEN + u16::MAX as usize;

/// Total on-the-wire size of the signal at the front of `buf`.  The caller
/// must have at least `MESSAGE_HEADER_LEN` bytes buffered.
pub fn peek_message_length(buf: &[u8]) -> usize {
    MESSAGE_HEADER_LEN + BigEndian::read_u16(&buf[2..4]) as usize
}

fn message_header(input: &[u8]) -> IResult<&[u8], (u16, u16)> {
    let (input, signal) = be_u16(input)?;
    let (input, length) = be_u16(input)?;
    Ok((input, (signal, length)))
}

/// One decoded DLEP signal: id plus its data items, in wire order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolMessage {
    pub signal: SignalIdType,
    pub data_items: Vec<DataItem>,
}

impl ProtocolMessage {
    pub fn new(signal: SignalIdType) -> Self {
        ProtocolMessage {
            signal,
            data_items: Vec::new(),
        }
    }

    /// Build a message by signal name, resolving the id via the catalogue.
    pub fn for_signal(protocfg: &ProtocolConfig, signal_name: &str) -> Self {
        Self::new(protocfg.signal_id(signal_name))
    }

    pub fn name(&self, protocfg: &ProtocolConfig) -> &'static str {
        protocfg.signal_name(self.signal).unwrap_or("Unknown")
    }

    /// Parse exactly one serialized signal.
    pub fn parse(buf: &[u8], protocfg: &ProtocolConfig) -> Result<ProtocolMessage, DlepParseError> {
        let (input, (signal, length)) = message_header(buf)?;
        if input.len() != length as usize {
            return Err(DlepParseError::LengthMismatch {
                expected: length as usize,
                actual: input.len(),
            });
        }
        if protocfg.signal_info(signal).is_none() {
            return Err(DlepParseError::UnknownSignal { signal });
        }
        let mut data_items = Vec::new();
        let mut rest = input;
        while !rest.is_empty() {
            let (next, item) = DataItem::parse(rest, protocfg)?;
            data_items.push(item);
            rest = next;
        }
        Ok(ProtocolMessage { signal, data_items })
    }

    /// Append the serialized signal to `buf`.
    pub fn emit(&self, buf: &mut BytesMut) {
        buf.put_u16(self.signal);
        let len_pos = buf.len();
        buf.put_u16(0);
        for item in &self.data_items {
            item.emit(buf);
        }
        let len = (buf.len() - len_pos - 2) as u16;
        BigEndian::write_u16(&mut buf[len_pos..len_pos + 2], len);
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.emit(&mut buf);
        buf
    }

    pub fn add_item(&mut self, item: DataItem) -> &mut Self {
        self.data_items.push(item);
        self
    }

    pub fn add_data_items(&mut self, items: Vec<DataItem>) -> &mut Self {
        self.data_items.extend(items);
        self
    }

    pub fn add_status(&mut self, protocfg: &ProtocolConfig, status_name: &str, text: &str) -> &mut Self {
        self.add_item(DataItem::new(
            protocfg.item_id(crate::protocfg::strings::STATUS),
            DataItemValue::Status {
                code: protocfg.status_code(status_name),
                text: text.to_string(),
            },
        ))
    }

    pub fn add_mac(&mut self, protocfg: &ProtocolConfig, mac: DlepMac) -> &mut Self {
        self.add_item(DataItem::new(
            protocfg.item_id(crate::protocfg::strings::MAC_ADDRESS),
            DataItemValue::Mac(mac),
        ))
    }

    pub fn add_heartbeat_interval(&mut self, protocfg: &ProtocolConfig, units: u32) -> &mut Self {
        self.add_item(DataItem::new(
            protocfg.item_id(crate::protocfg::strings::HEARTBEAT_INTERVAL),
            DataItemValue::U32(units),
        ))
    }

    pub fn add_extensions(
        &mut self,
        protocfg: &ProtocolConfig,
        extensions: &[ExtensionIdType],
    ) -> &mut Self {
        if extensions.is_empty() {
            return self;
        }
        self.add_item(DataItem::new(
            protocfg.item_id(crate::protocfg::strings::EXTENSIONS_SUPPORTED),
            DataItemValue::ExtensionList(extensions.to_vec()),
        ))
    }

    pub fn add_peer_type(&mut self, protocfg: &ProtocolConfig, peer_type: &str) -> &mut Self {
        if peer_type.is_empty() {
            return self;
        }
        self.add_item(DataItem::new(
            protocfg.item_id(crate::protocfg::strings::PEER_TYPE),
            DataItemValue::Text(peer_type.to_string()),
        ))
    }

    fn item_by_name(&self, protocfg: &ProtocolConfig, name: &str) -> Option<&DataItem> {
        let id = protocfg.item_id(name);
        self.data_items.iter().find(|di| di.id == id)
    }

    /// Status code and text, if the message carries a Status data item.
    pub fn status(&self, protocfg: &ProtocolConfig) -> Option<(u8, &str)> {
        self.data_items
            .iter()
            .find(|di| protocfg.is_status(di.id))
            .and_then(|di| match &di.value {
                DataItemValue::Status { code, text } => Some((*code, text.as_str())),
                _ => None,
            })
    }

    pub fn mac(&self, protocfg: &ProtocolConfig) -> Option<DlepMac> {
        self.item_by_name(protocfg, crate::protocfg::strings::MAC_ADDRESS)
            .and_then(|di| match &di.value {
                DataItemValue::Mac(mac) => Some(*mac),
                _ => None,
            })
    }

    pub fn heartbeat_interval(&self, protocfg: &ProtocolConfig) -> Option<u32> {
        self.item_by_name(protocfg, crate::protocfg::strings::HEARTBEAT_INTERVAL)
            .and_then(|di| match &di.value {
                DataItemValue::U32(v) => Some(*v),
                _ => None,
            })
    }

    pub fn extensions(&self, protocfg: &ProtocolConfig) -> Vec<ExtensionIdType> {
        self.item_by_name(protocfg, crate::protocfg::strings::EXTENSIONS_SUPPORTED)
            .and_then(|di| match &di.value {
                DataItemValue::ExtensionList(exts) => Some(exts.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub fn peer_type(&self, protocfg: &ProtocolConfig) -> Option<&str> {
        self.item_by_name(protocfg, crate::protocfg::strings::PEER_TYPE)
            .and_then(|di| match &di.value {
                DataItemValue::Text(s) => Some(s.as_str()),
                _ => None,
            })
    }

    /// The metric and IP address data items of this message; everything else
    /// (status, MAC, heartbeat, ...) is filtered out.  This is what the
    /// information base stores.
    pub fn metric_and_ip_items(&self, protocfg: &ProtocolConfig) -> Vec<DataItem> {
        self.data_items
            .iter()
            .filter(|di| protocfg.is_metric(di.id) || protocfg.is_ipaddr(di.id))
            .cloned()
            .collect()
    }
}

/// Convenience constructor for IP address data items.
pub fn ip_data_item(
    protocfg: &ProtocolConfig,
    item_name: &str,
    net: ipnet::IpNet,
    add: bool,
) -> DataItem {
    let flags = if add { IpFlags::ADD } else { IpFlags::empty() };
    DataItem::new(protocfg.item_id(item_name), DataItemValue::Addr { flags, net })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocfg::strings;

    #[test]
    fn session_init_roundtrip() {
        let protocfg = ProtocolConfig::default_config();
        let mut pm = ProtocolMessage::for_signal(&protocfg, strings::SESSION_INITIALIZATION);
        pm.add_heartbeat_interval(&protocfg, 60000)
            .add_extensions(&protocfg, &[1, 2])
            .add_peer_type(&protocfg, "modem");

        let buf = pm.to_bytes();
        assert_eq!(peek_message_length(&buf), buf.len());

        let parsed = ProtocolMessage::parse(&buf, &protocfg).unwrap();
        assert_eq!(parsed.name(&protocfg), strings::SESSION_INITIALIZATION);
        assert_eq!(parsed.heartbeat_interval(&protocfg), Some(60000));
        assert_eq!(parsed.extensions(&protocfg), vec![1, 2]);
        assert_eq!(parsed.peer_type(&protocfg), Some("modem"));
    }

    #[test]
    fn status_and_mac_accessors() {
        let protocfg = ProtocolConfig::default_config();
        let mac: DlepMac = "aa:bb:cc:00:00:01".parse().unwrap();
        let mut pm = ProtocolMessage::for_signal(&protocfg, strings::DESTINATION_UP_RESPONSE);
        pm.add_mac(&protocfg, mac)
            .add_status(&protocfg, strings::NOT_INTERESTED, "no thanks");

        let parsed = ProtocolMessage::parse(&pm.to_bytes(), &protocfg).unwrap();
        assert_eq!(parsed.mac(&protocfg), Some(mac));
        let (code, text) = parsed.status(&protocfg).unwrap();
        assert_eq!(code, protocfg.status_code(strings::NOT_INTERESTED));
        assert_eq!(text, "no thanks");
    }

    #[test]
    fn unknown_signal_rejected() {
        let protocfg = ProtocolConfig::default_config();
        let buf: &[u8] = &[0x00, 0x63, 0x00, 0x00];
        assert!(matches!(
            ProtocolMessage::parse(buf, &protocfg),
            Err(DlepParseError::UnknownSignal { signal: 99 })
        ));
    }

    #[test]
    fn length_mismatch_rejected() {
        let protocfg = ProtocolConfig::default_config();
        // Heartbeat claiming 4 payload bytes but carrying none.
        let buf: &[u8] = &[0x00, 0x10, 0x00, 0x04];
        assert!(matches!(
            ProtocolMessage::parse(buf, &protocfg),
            Err(DlepParseError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn metric_and_ip_filter() {
        let protocfg = ProtocolConfig::default_config();
        let mac: DlepMac = "aa:bb:cc:00:00:01".parse().unwrap();
        let mut pm = ProtocolMessage::for_signal(&protocfg, strings::DESTINATION_UP);
        pm.add_mac(&protocfg, mac);
        pm.add_item(DataItem::new(
            protocfg.item_id(strings::LATENCY),
            DataItemValue::U64(250),
        ));
        pm.add_item(ip_data_item(
            &protocfg,
            strings::IPV4_ADDRESS,
            "10.0.0.5/32".parse().unwrap(),
            true,
        ));

        let stored = pm.metric_and_ip_items(&protocfg);
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|di| di.id != protocfg.item_id(strings::MAC_ADDRESS)));
    }
}
