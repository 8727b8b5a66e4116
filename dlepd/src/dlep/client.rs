use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use dlep_packet::{DataItem, DlepMac, ExtensionIdType};

/// Snapshot of a peer handed to the embedder when its session comes up.
#[derive(Debug, Clone, Serialize)]
pub struct PeerInfo {
    pub peer_id: String,
    pub peer_type: String,
    /// Heartbeat interval the peer declared, in catalogue units.
    pub heartbeat_interval: u32,
    /// Extensions usable with this peer.
    pub extensions: Vec<ExtensionIdType>,
}

/// Protocol events reported to the embedder.
#[derive(Debug)]
pub enum ClientEvent {
    PeerUp {
        peer_info: PeerInfo,
    },
    PeerDown {
        peer_id: String,
        reason: String,
    },
    DestinationUp {
        peer_id: String,
        mac: DlepMac,
        data_items: Vec<DataItem>,
    },
    DestinationUpdate {
        peer_id: String,
        mac: DlepMac,
        data_items: Vec<DataItem>,
    },
    DestinationDown {
        peer_id: String,
        mac: DlepMac,
    },
    PeerUpdate {
        peer_id: String,
        data_items: Vec<DataItem>,
    },
}

/// Commands the embedder posts into the event loop.  Each operates on the
/// local peer-data and fans out to every in-session peer.
#[derive(Debug)]
pub enum ClientCommand {
    DestinationUp {
        mac: DlepMac,
        data_items: Vec<DataItem>,
    },
    DestinationUpdate {
        mac: DlepMac,
        data_items: Vec<DataItem>,
    },
    DestinationDown {
        mac: DlepMac,
    },
    PeerUpdate {
        data_items: Vec<DataItem>,
    },
    LinkCharacteristicsRequest {
        peer_id: String,
        mac: DlepMac,
        data_items: Vec<DataItem>,
    },
}

/// Channel pair on which the session core reports events to the embedder.
#[derive(Debug)]
pub struct ClientChannel {
    pub tx: UnboundedSender<ClientEvent>,
    pub rx: UnboundedReceiver<ClientEvent>,
}

impl ClientChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }
}

impl Default for ClientChannel {
    fn default() -> Self {
        Self::new()
    }
}
