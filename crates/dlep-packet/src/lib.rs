pub mod data_item;
pub use data_item::{DataItem, DataItemValue, IpFlags};

pub mod error;
pub use error::DlepParseError;

pub mod mac;
pub use mac::DlepMac;

pub mod message;
pub use message::{
    MAX_SIGNAL_SIZE, MESSAGE_HEADER_LEN, ProtocolMessage, ip_data_item, peek_message_length,
};

pub mod parse_be;
pub use parse_be::ParseBe;

pub mod protocfg;
pub use protocfg::{
    DataItemIdType, DataItemInfo, DataItemType, DataItemUsage, ExtensionIdType, ProtocolConfig,
    SignalIdType, SignalInfo, StatusCodeType, strings,
};
