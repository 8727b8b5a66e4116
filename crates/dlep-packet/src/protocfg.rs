use std::collections::BTreeMap;

pub type SignalIdType = u16;
pub type DataItemIdType = u16;
pub type StatusCodeType = u8;
pub type ExtensionIdType = u16;

/// Canonical signal, data item, and status names.  Handlers refer to the
/// protocol by these names and resolve numeric ids through the catalogue.
pub mod strings {
    pub const SESSION_INITIALIZATION: &str = "Session Initialization";
    pub const SESSION_INITIALIZATION_RESPONSE: &str = "Session Initialization Response";
    pub const SESSION_UPDATE: &str = "Session Update";
    pub const SESSION_UPDATE_RESPONSE: &str = "Session Update Response";
    pub const SESSION_TERMINATION: &str = "Session Termination";
    pub const SESSION_TERMINATION_RESPONSE: &str = "Session Termination Response";
    pub const DESTINATION_UP: &str = "Destination Up";
    pub const DESTINATION_UP_RESPONSE: &str = "Destination Up Response";
    pub const DESTINATION_ANNOUNCE: &str = "Destination Announce";
    pub const DESTINATION_ANNOUNCE_RESPONSE: &str = "Destination Announce Response";
    pub const DESTINATION_DOWN: &str = "Destination Down";
    pub const DESTINATION_DOWN_RESPONSE: &str = "Destination Down Response";
    pub const DESTINATION_UPDATE: &str = "Destination Update";
    pub const LINK_CHARACTERISTICS_REQUEST: &str = "Link Characteristics Request";
    pub const LINK_CHARACTERISTICS_RESPONSE: &str = "Link Characteristics Response";
    pub const HEARTBEAT: &str = "Heartbeat";

    pub const STATUS: &str = "Status";
    pub const IPV4_CONNECTION_POINT: &str = "IPv4 Connection Point";
    pub const IPV6_CONNECTION_POINT: &str = "IPv6 Connection Point";
    pub const PEER_TYPE: &str = "Peer Type";
    pub const HEARTBEAT_INTERVAL: &str = "Heartbeat Interval";
    pub const EXTENSIONS_SUPPORTED: &str = "Extensions Supported";
    pub const MAC_ADDRESS: &str = "MAC Address";
    pub const IPV4_ADDRESS: &str = "IPv4 Address";
    pub const IPV6_ADDRESS: &str = "IPv6 Address";
    pub const IPV4_ATTACHED_SUBNET: &str = "IPv4 Attached Subnet";
    pub const IPV6_ATTACHED_SUBNET: &str = "IPv6 Attached Subnet";
    pub const MAXIMUM_DATA_RATE_RX: &str = "Maximum Data Rate (Receive)";
    pub const MAXIMUM_DATA_RATE_TX: &str = "Maximum Data Rate (Transmit)";
    pub const CURRENT_DATA_RATE_RX: &str = "Current Data Rate (Receive)";
    pub const CURRENT_DATA_RATE_TX: &str = "Current Data Rate (Transmit)";
    pub const LATENCY: &str = "Latency";
    pub const RESOURCES: &str = "Resources";
    pub const RELATIVE_LINK_QUALITY_RX: &str = "Relative Link Quality (Receive)";
    pub const RELATIVE_LINK_QUALITY_TX: &str = "Relative Link Quality (Transmit)";
    pub const EXPERIMENT_NAME: &str = "Experiment Name";
    pub const EXPERIMENTAL_DEFINITION: &str = "Experimental Definition";

    pub const SUCCESS: &str = "Success";
    pub const NOT_INTERESTED: &str = "Not Interested";
    pub const REQUEST_DENIED: &str = "Request Denied";
    pub const INCONSISTENT_DATA: &str = "Inconsistent Data";
    pub const UNKNOWN_MESSAGE: &str = "Unknown Message";
    pub const INVALID_MESSAGE: &str = "Invalid Message";
    pub const INVALID_DATA: &str = "Invalid Data";
    pub const INVALID_DESTINATION: &str = "Invalid Destination";
    pub const TIMED_OUT: &str = "Timed Out";
    pub const SHUTTING_DOWN: &str = "Shutting Down";
}

/// Wire layout of a data item's value.  The layout of an id is a catalogue
/// property, never a property of the stored value itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataItemType {
    U8,
    U16,
    U32,
    U64,
    Text,
    Mac,
    /// Flags octet followed by an IPv4/IPv6 address and an optional prefix.
    Addr,
    ExtensionList,
    Status,
    /// Raw bytes, for private-use entries whose layout the catalogue does
    /// not model further.
    Opaque,
}

/// How the session core treats a data item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataItemUsage {
    Metric,
    IpAddr,
    Status,
    Other,
}

#[derive(Debug, Clone)]
pub struct SignalInfo {
    pub id: SignalIdType,
    pub name: &'static str,
    /// Name of the response this signal expects, if it is a request.
    pub response: Option<&'static str>,
}

#[derive(Debug, Clone)]
pub struct DataItemInfo {
    pub id: DataItemIdType,
    pub name: &'static str,
    pub typ: DataItemType,
    pub usage: DataItemUsage,
}

/// Protocol catalogue: signal and data item tables plus unit conversions.
/// Immutable once built; the session core resolves every numeric id through
/// it and hard-codes none.
#[derive(Debug)]
pub struct ProtocolConfig {
    signals: BTreeMap<SignalIdType, SignalInfo>,
    signal_ids: BTreeMap<&'static str, SignalIdType>,
    items: BTreeMap<DataItemIdType, DataItemInfo>,
    item_ids: BTreeMap<&'static str, DataItemIdType>,
    status_names: BTreeMap<StatusCodeType, &'static str>,
    status_codes: BTreeMap<&'static str, StatusCodeType>,
    /// Divisor converting Heartbeat Interval units to seconds.
    heartbeat_unit_divisor: u32,
}

impl ProtocolConfig {
    /// The standard session-protocol tables: signals 1-16, data items 1-19
    /// plus the experiment name in the private-use range, heartbeat interval
    /// carried in milliseconds.
    pub fn default_config() -> Self {
        use DataItemType::*;
        use DataItemUsage::{IpAddr, Metric, Other};
        use strings::*;

        let mut cfg = ProtocolConfig {
            signals: BTreeMap::new(),
            signal_ids: BTreeMap::new(),
            items: BTreeMap::new(),
            item_ids: BTreeMap::new(),
            status_names: BTreeMap::new(),
            status_codes: BTreeMap::new(),
            heartbeat_unit_divisor: 1000,
        };

        cfg.add_signal(1, SESSION_INITIALIZATION, Some(SESSION_INITIALIZATION_RESPONSE));
        cfg.add_signal(2, SESSION_INITIALIZATION_RESPONSE, None);
        cfg.add_signal(3, SESSION_UPDATE, Some(SESSION_UPDATE_RESPONSE));
        cfg.add_signal(4, SESSION_UPDATE_RESPONSE, None);
        cfg.add_signal(5, SESSION_TERMINATION, Some(SESSION_TERMINATION_RESPONSE));
        cfg.add_signal(6, SESSION_TERMINATION_RESPONSE, None);
        cfg.add_signal(7, DESTINATION_UP, Some(DESTINATION_UP_RESPONSE));
        cfg.add_signal(8, DESTINATION_UP_RESPONSE, None);
        cfg.add_signal(9, DESTINATION_ANNOUNCE, Some(DESTINATION_ANNOUNCE_RESPONSE));
        cfg.add_signal(10, DESTINATION_ANNOUNCE_RESPONSE, None);
        cfg.add_signal(11, DESTINATION_DOWN, Some(DESTINATION_DOWN_RESPONSE));
        cfg.add_signal(12, DESTINATION_DOWN_RESPONSE, None);
        cfg.add_signal(13, DESTINATION_UPDATE, None);
        cfg.add_signal(14, LINK_CHARACTERISTICS_REQUEST, Some(LINK_CHARACTERISTICS_RESPONSE));
        cfg.add_signal(15, LINK_CHARACTERISTICS_RESPONSE, None);
        cfg.add_signal(16, HEARTBEAT, None);

        cfg.add_item(1, STATUS, Status, DataItemUsage::Status);
        cfg.add_item(2, IPV4_CONNECTION_POINT, Addr, Other);
        cfg.add_item(3, IPV6_CONNECTION_POINT, Addr, Other);
        cfg.add_item(4, PEER_TYPE, Text, Other);
        cfg.add_item(5, HEARTBEAT_INTERVAL, U32, Other);
        cfg.add_item(6, EXTENSIONS_SUPPORTED, ExtensionList, Other);
        cfg.add_item(7, MAC_ADDRESS, Mac, Other);
        cfg.add_item(8, IPV4_ADDRESS, Addr, IpAddr);
        cfg.add_item(9, IPV6_ADDRESS, Addr, IpAddr);
        cfg.add_item(10, IPV4_ATTACHED_SUBNET, Addr, IpAddr);
        cfg.add_item(11, IPV6_ATTACHED_SUBNET, Addr, IpAddr);
        cfg.add_item(12, MAXIMUM_DATA_RATE_RX, U64, Metric);
        cfg.add_item(13, MAXIMUM_DATA_RATE_TX, U64, Metric);
        cfg.add_item(14, CURRENT_DATA_RATE_RX, U64, Metric);
        cfg.add_item(15, CURRENT_DATA_RATE_TX, U64, Metric);
        cfg.add_item(16, LATENCY, U64, Metric);
        cfg.add_item(17, RESOURCES, U8, Metric);
        cfg.add_item(18, RELATIVE_LINK_QUALITY_RX, U8, Metric);
        cfg.add_item(19, RELATIVE_LINK_QUALITY_TX, U8, Metric);
        cfg.add_item(65408, EXPERIMENT_NAME, Text, Other);
        cfg.add_item(65409, EXPERIMENTAL_DEFINITION, Opaque, Other);

        cfg.add_status(0, SUCCESS);
        cfg.add_status(1, NOT_INTERESTED);
        cfg.add_status(2, REQUEST_DENIED);
        cfg.add_status(3, INCONSISTENT_DATA);
        cfg.add_status(128, UNKNOWN_MESSAGE);
        cfg.add_status(129, INVALID_MESSAGE);
        cfg.add_status(130, INVALID_DATA);
        cfg.add_status(131, INVALID_DESTINATION);
        cfg.add_status(132, TIMED_OUT);
        cfg.add_status(133, SHUTTING_DOWN);

        cfg
    }

    fn add_signal(&mut self, id: SignalIdType, name: &'static str, response: Option<&'static str>) {
        self.signals.insert(id, SignalInfo { id, name, response });
        self.signal_ids.insert(name, id);
    }

    fn add_item(
        &mut self,
        id: DataItemIdType,
        name: &'static str,
        typ: DataItemType,
        usage: DataItemUsage,
    ) {
        self.items.insert(
            id,
            DataItemInfo {
                id,
                name,
                typ,
                usage,
            },
        );
        self.item_ids.insert(name, id);
    }

    fn add_status(&mut self, code: StatusCodeType, name: &'static str) {
        self.status_names.insert(code, name);
        self.status_codes.insert(name, code);
    }

    pub fn signal_info(&self, id: SignalIdType) -> Option<&SignalInfo> {
        self.signals.get(&id)
    }

    pub fn signal_name(&self, id: SignalIdType) -> Option<&'static str> {
        self.signals.get(&id).map(|s| s.name)
    }

    /// Numeric id for a signal name.  Unknown names map to 0, which is not a
    /// valid signal id.
    pub fn signal_id(&self, name: &str) -> SignalIdType {
        self.signal_ids.get(name).copied().unwrap_or(0)
    }

    /// Id of the response a request signal expects, if any.
    pub fn response_for(&self, signal: SignalIdType) -> Option<SignalIdType> {
        let info = self.signals.get(&signal)?;
        let response = info.response?;
        Some(self.signal_id(response))
    }

    pub fn item_info(&self, id: DataItemIdType) -> Option<&DataItemInfo> {
        self.items.get(&id)
    }

    pub fn item_name(&self, id: DataItemIdType) -> Option<&'static str> {
        self.items.get(&id).map(|i| i.name)
    }

    pub fn item_id(&self, name: &str) -> DataItemIdType {
        self.item_ids.get(name).copied().unwrap_or(0)
    }

    /// Ids of every catalogue entry classified as a metric.
    pub fn metric_ids(&self) -> Vec<DataItemIdType> {
        self.items
            .values()
            .filter(|i| i.usage == DataItemUsage::Metric)
            .map(|i| i.id)
            .collect()
    }

    pub fn is_metric(&self, id: DataItemIdType) -> bool {
        self.items
            .get(&id)
            .map(|i| i.usage == DataItemUsage::Metric)
            .unwrap_or(false)
    }

    pub fn is_ipaddr(&self, id: DataItemIdType) -> bool {
        self.items
            .get(&id)
            .map(|i| i.usage == DataItemUsage::IpAddr)
            .unwrap_or(false)
    }

    pub fn is_status(&self, id: DataItemIdType) -> bool {
        self.items
            .get(&id)
            .map(|i| i.usage == DataItemUsage::Status)
            .unwrap_or(false)
    }

    pub fn status_code(&self, name: &str) -> StatusCodeType {
        self.status_codes.get(name).copied().unwrap_or(u8::MAX)
    }

    pub fn status_name(&self, code: StatusCodeType) -> &'static str {
        self.status_names.get(&code).copied().unwrap_or("Unknown")
    }

    /// Convert a heartbeat interval from catalogue units to whole seconds.
    /// A zero interval disables heartbeats; a non-zero interval never
    /// converts below one second.
    pub fn heartbeat_interval_secs(&self, units: u32) -> u32 {
        if units == 0 {
            0
        } else {
            (units / self.heartbeat_unit_divisor).max(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tables() {
        let cfg = ProtocolConfig::default_config();
        assert_eq!(cfg.signal_id(strings::SESSION_INITIALIZATION), 1);
        assert_eq!(cfg.signal_name(16), Some(strings::HEARTBEAT));
        assert_eq!(
            cfg.response_for(cfg.signal_id(strings::DESTINATION_UP)),
            Some(cfg.signal_id(strings::DESTINATION_UP_RESPONSE))
        );
        assert_eq!(cfg.response_for(cfg.signal_id(strings::HEARTBEAT)), None);
        assert!(cfg.is_metric(cfg.item_id(strings::LATENCY)));
        assert!(cfg.is_ipaddr(cfg.item_id(strings::IPV4_ADDRESS)));
        assert!(!cfg.is_metric(cfg.item_id(strings::MAC_ADDRESS)));
        let experimental = cfg.item_id(strings::EXPERIMENTAL_DEFINITION);
        assert_eq!(cfg.item_info(experimental).map(|i| i.typ), Some(DataItemType::Opaque));
        assert!(!cfg.is_metric(experimental) && !cfg.is_ipaddr(experimental));
        assert_eq!(cfg.status_code(strings::SUCCESS), 0);
        assert_eq!(cfg.status_name(132), strings::TIMED_OUT);
    }

    #[test]
    fn heartbeat_unit_conversion() {
        let cfg = ProtocolConfig::default_config();
        assert_eq!(cfg.heartbeat_interval_secs(0), 0);
        assert_eq!(cfg.heartbeat_interval_secs(500), 1);
        assert_eq!(cfg.heartbeat_interval_secs(1000), 1);
        assert_eq!(cfg.heartbeat_interval_secs(60000), 60);
    }
}
