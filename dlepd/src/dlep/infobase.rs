use std::collections::BTreeMap;

use dlep_packet::{
    DataItem, DataItemIdType, DataItemType, DataItemValue, DlepMac, ProtocolConfig, strings,
};

use crate::{dlep_debug, dlep_error};

/// Add or drop an IP address or subnet on the list belonging to one owner
/// (a peer or a destination).  Adding an address the owner already has is a
/// no-op; dropping an address the owner does not have is a no-op.  Callers
/// that need either case to be an error validate first.
fn update_ip_data_items(owner_name: &str, ip_data_items: &mut Vec<DataItem>, new_item: &DataItem) {
    let adding = new_item.is_add();

    if let Some(pos) = new_item.find_ip_data_item(ip_data_items) {
        if !adding {
            dlep_debug!("{} remove {}", owner_name, new_item.value);
            ip_data_items.remove(pos);
        }
        return;
    }

    if adding {
        dlep_debug!("{} add {}", owner_name, new_item.value);
        ip_data_items.push(new_item.clone());
    }
}

/// Information about one destination: its latest metric values (one per
/// metric id) and its ordered IP address list.
#[derive(Debug)]
pub struct DestinationData {
    mac_address: DlepMac,
    metric_data_items: BTreeMap<DataItemIdType, DataItem>,
    ip_data_items: Vec<DataItem>,
    /// Name of the response the peer is still owed for this destination, or
    /// empty.
    needs_response: String,
}

impl DestinationData {
    /// Only metric and IP address items are stored; anything else in the
    /// initial set (Status, MAC Address, ...) is dropped.
    pub fn new(mac: DlepMac, initial_data_items: &[DataItem], protocfg: &ProtocolConfig) -> Self {
        let mut dd = DestinationData {
            mac_address: mac,
            metric_data_items: BTreeMap::new(),
            ip_data_items: Vec::new(),
            needs_response: String::new(),
        };
        dd.update(initial_data_items, protocfg);
        dd
    }

    /// Record updated data items, returning the number applied.  Metric
    /// entries are replaced by id, last write wins.
    pub fn update(&mut self, updates: &[DataItem], protocfg: &ProtocolConfig) -> usize {
        let mut num_updates = 0;
        let owner = format!("destination={}", self.mac_address);
        for di in updates {
            if protocfg.is_metric(di.id) {
                self.metric_data_items.insert(di.id, di.clone());
                num_updates += 1;
            } else if protocfg.is_ipaddr(di.id) {
                update_ip_data_items(&owner, &mut self.ip_data_items, di);
                num_updates += 1;
            }
        }
        num_updates
    }

    pub fn mac(&self) -> DlepMac {
        self.mac_address
    }

    pub fn all_data_items(&self) -> Vec<DataItem> {
        let mut out: Vec<DataItem> = self.metric_data_items.values().cloned().collect();
        out.extend(self.ip_data_items.iter().cloned());
        out
    }

    pub fn metric_data_items(&self) -> Vec<DataItem> {
        self.metric_data_items.values().cloned().collect()
    }

    pub fn ip_data_items(&self) -> &[DataItem] {
        &self.ip_data_items
    }

    pub fn metric(&self, id: DataItemIdType) -> Option<&DataItem> {
        self.metric_data_items.get(&id)
    }

    pub fn set_needs_response(&mut self, response_name: &str) {
        self.needs_response = response_name.to_string();
    }

    pub fn needs_response(&self) -> &str {
        &self.needs_response
    }

    /// Non-empty owner string if this destination holds an IP-equal item.
    pub fn find_ip_data_item(&self, ip_data_item: &DataItem) -> Option<String> {
        ip_data_item
            .find_ip_data_item(&self.ip_data_items)
            .map(|_| format!("destination={}", self.mac_address))
    }
}

/// Per-peer store: the peer's own metrics and addresses plus its
/// destinations.  The local peer-data singleton uses the same type.
#[derive(Debug)]
pub struct PeerData {
    peer_id: String,
    destination_data: BTreeMap<DlepMac, DestinationData>,
    metric_data_items: BTreeMap<DataItemIdType, DataItem>,
    ip_data_items: Vec<DataItem>,
}

impl PeerData {
    pub fn new(id: &str, initial_data_items: &[DataItem], protocfg: &ProtocolConfig) -> Self {
        let mut metric_data_items = BTreeMap::new();
        let mut ip_data_items = Vec::new();
        let owner = format!("peer={}", id);
        for di in initial_data_items {
            if protocfg.is_metric(di.id) {
                metric_data_items.insert(di.id, di.clone());
            } else if protocfg.is_ipaddr(di.id) {
                update_ip_data_items(&owner, &mut ip_data_items, di);
            }
        }
        PeerData {
            peer_id: id.to_string(),
            destination_data: BTreeMap::new(),
            metric_data_items,
            ip_data_items,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn add_destination(
        &mut self,
        mac: DlepMac,
        initial_data_items: &[DataItem],
        protocfg: &ProtocolConfig,
    ) -> bool {
        if self.destination_data.contains_key(&mac) {
            dlep_error!(
                "adding destination mac={} that already exists for peer={}",
                mac,
                self.peer_id
            );
            return false;
        }
        self.destination_data
            .insert(mac, DestinationData::new(mac, initial_data_items, protocfg));
        true
    }

    /// Apply updates to one destination; `None` if the MAC is unknown.
    pub fn update_destination(
        &mut self,
        mac: DlepMac,
        updates: &[DataItem],
        protocfg: &ProtocolConfig,
    ) -> Option<usize> {
        self.destination_data
            .get_mut(&mac)
            .map(|dd| dd.update(updates, protocfg))
    }

    pub fn remove_destination(&mut self, mac: DlepMac) -> bool {
        if self.destination_data.remove(&mac).is_none() {
            dlep_error!(
                "removing destination mac={} that does not exist for peer={}",
                mac,
                self.peer_id
            );
            return false;
        }
        true
    }

    pub fn destination(&self, mac: DlepMac) -> Option<&DestinationData> {
        self.destination_data.get(&mac)
    }

    pub fn destination_mut(&mut self, mac: DlepMac) -> Option<&mut DestinationData> {
        self.destination_data.get_mut(&mac)
    }

    pub fn valid_destination(&self, mac: DlepMac) -> bool {
        self.destination_data.contains_key(&mac)
    }

    pub fn destinations(&self) -> impl Iterator<Item = (&DlepMac, &DestinationData)> {
        self.destination_data.iter()
    }

    pub fn destination_macs(&self) -> Vec<DlepMac> {
        self.destination_data.keys().copied().collect()
    }

    pub fn has_metric(&self, id: DataItemIdType) -> bool {
        self.metric_data_items.contains_key(&id)
    }

    pub fn metric(&self, id: DataItemIdType) -> Option<&DataItem> {
        self.metric_data_items.get(&id)
    }

    /// Apply a peer-level update.  The whole batch is validated first: a
    /// metric id the peer did not declare at initialization rejects the
    /// entire update and nothing is applied.  Accepted metric updates
    /// cascade to every destination of this peer without generating
    /// per-destination signals; the peer-level message carries the updates
    /// for the far side.
    pub fn update_data_items(
        &mut self,
        updates: &[DataItem],
        protocfg: &ProtocolConfig,
    ) -> &'static str {
        for di in updates {
            if protocfg.is_metric(di.id) && !self.metric_data_items.contains_key(&di.id) {
                dlep_error!(
                    "peer={} metric {} in update is previously unknown",
                    self.peer_id,
                    di.name(protocfg)
                );
                return strings::INVALID_MESSAGE;
            }
        }

        let owner = format!("peer={}", self.peer_id);
        let mut destination_updates = Vec::new();
        for di in updates {
            if protocfg.is_metric(di.id) {
                self.metric_data_items.insert(di.id, di.clone());
                destination_updates.push(di.clone());
            } else if protocfg.is_ipaddr(di.id) {
                // IP addresses do not propagate to destinations.
                update_ip_data_items(&owner, &mut self.ip_data_items, di);
            }
        }

        if !destination_updates.is_empty() {
            for dd in self.destination_data.values_mut() {
                dd.update(&destination_updates, protocfg);
            }
        }

        strings::SUCCESS
    }

    pub fn data_items(&self) -> Vec<DataItem> {
        let mut out: Vec<DataItem> = self.metric_data_items.values().cloned().collect();
        out.extend(self.ip_data_items.iter().cloned());
        out
    }

    pub fn ip_data_items(&self) -> &[DataItem] {
        &self.ip_data_items
    }

    pub fn set_needs_response(&mut self, mac: DlepMac, response_name: &str) {
        if let Some(dd) = self.destination_data.get_mut(&mac) {
            dd.set_needs_response(response_name);
        }
    }

    pub fn needs_response(&self, mac: DlepMac) -> String {
        self.destination_data
            .get(&mac)
            .map(|dd| dd.needs_response().to_string())
            .unwrap_or_default()
    }

    /// Owner string if this peer or one of its destinations holds an
    /// IP-equal item.
    pub fn find_ip_data_item(&self, ip_data_item: &DataItem) -> Option<String> {
        if ip_data_item.find_ip_data_item(&self.ip_data_items).is_some() {
            return Some(format!("peer={}", self.peer_id));
        }
        self.destination_data
            .values()
            .find_map(|dd| dd.find_ip_data_item(ip_data_item))
    }
}

/// Peer-id under which locally-originated metrics and destinations live.
pub const LOCAL_PEER_ID: &str = "local";

/// In-memory store of all peers, their destinations, and their data items.
/// The local peer-data singleton owns what this side originates and seeds
/// every real peer at session establishment.
#[derive(Debug)]
pub struct InfoBase {
    local: PeerData,
    peer_data: BTreeMap<String, PeerData>,
}

impl InfoBase {
    /// The local peer-data starts out with a default value for every metric
    /// the catalogue knows, so peer-level updates always address a declared
    /// metric.
    pub fn new(protocfg: &ProtocolConfig) -> Self {
        let defaults: Vec<DataItem> = protocfg
            .metric_ids()
            .into_iter()
            .filter_map(|id| {
                let info = protocfg.item_info(id)?;
                let value = match info.typ {
                    DataItemType::U8 => DataItemValue::U8(0),
                    DataItemType::U16 => DataItemValue::U16(0),
                    DataItemType::U32 => DataItemValue::U32(0),
                    DataItemType::U64 => DataItemValue::U64(0),
                    _ => return None,
                };
                Some(DataItem::new(id, value))
            })
            .collect();
        InfoBase {
            local: PeerData::new(LOCAL_PEER_ID, &defaults, protocfg),
            peer_data: BTreeMap::new(),
        }
    }

    pub fn local(&self) -> &PeerData {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut PeerData {
        &mut self.local
    }

    pub fn add_peer(
        &mut self,
        peer_id: &str,
        initial_data_items: &[DataItem],
        protocfg: &ProtocolConfig,
    ) -> &mut PeerData {
        self.peer_data.insert(
            peer_id.to_string(),
            PeerData::new(peer_id, initial_data_items, protocfg),
        );
        self.peer_data.get_mut(peer_id).unwrap()
    }

    pub fn remove_peer(&mut self, peer_id: &str) -> bool {
        if self.peer_data.remove(peer_id).is_none() {
            dlep_debug!("removing peer={} that has no peer data", peer_id);
            return false;
        }
        true
    }

    pub fn peer(&self, peer_id: &str) -> Option<&PeerData> {
        self.peer_data.get(peer_id)
    }

    pub fn peer_mut(&mut self, peer_id: &str) -> Option<&mut PeerData> {
        self.peer_data.get_mut(peer_id)
    }

    pub fn valid_peer(&self, peer_id: &str) -> bool {
        self.peer_data.contains_key(peer_id)
    }

    pub fn valid_destination(&self, peer_id: &str, mac: DlepMac) -> bool {
        self.peer_data
            .get(peer_id)
            .map(|pd| pd.valid_destination(mac))
            .unwrap_or(false)
    }

    /// Search the whole node for an IP-equal item: the local peer-data,
    /// every peer, and every destination.  At most one owner can hold a
    /// given address at any instant.
    pub fn find_ip_owner(&self, ip_data_item: &DataItem) -> Option<String> {
        if let Some(owner) = self.local.find_ip_data_item(ip_data_item) {
            return Some(owner);
        }
        self.peer_data
            .values()
            .find_map(|pd| pd.find_ip_data_item(ip_data_item))
    }

    /// Validate a batch of new data items against the node-wide IP index and
    /// the owner's existing addresses.  Adds must not exist anywhere;
    /// removes must exist on the named owner.  Non-IP items are ignored.
    pub fn validate_ip_data_items(
        &self,
        new_data_items: &[DataItem],
        existing_ip_data_items: &[DataItem],
        protocfg: &ProtocolConfig,
    ) -> Result<(), String> {
        for di in new_data_items {
            if !protocfg.is_ipaddr(di.id) {
                continue;
            }
            if di.is_add() {
                if let Some(owner) = self.find_ip_owner(di) {
                    return Err(format!("{} already in use by {}", di.value, owner));
                }
            } else if di.find_ip_data_item(existing_ip_data_items).is_none() {
                return Err(format!("{} does not exist, cannot remove", di.value));
            }
        }
        Ok(())
    }

    /// Peer-level update with whole-batch metric validation.
    pub fn update_peer_items(
        &mut self,
        peer_id: &str,
        updates: &[DataItem],
        protocfg: &ProtocolConfig,
    ) -> &'static str {
        match self.peer_data.get_mut(peer_id) {
            Some(pd) => pd.update_data_items(updates, protocfg),
            None => {
                dlep_error!("peer={} not found for peer update", peer_id);
                strings::INVALID_MESSAGE
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlep_packet::{ip_data_item, strings};

    fn protocfg() -> ProtocolConfig {
        ProtocolConfig::default_config()
    }

    fn mac(last: u8) -> DlepMac {
        DlepMac::from([0xaa, 0xbb, 0xcc, 0, 0, last])
    }

    fn latency(protocfg: &ProtocolConfig, value: u64) -> DataItem {
        DataItem::new(protocfg.item_id(strings::LATENCY), DataItemValue::U64(value))
    }

    fn ipv4(protocfg: &ProtocolConfig, addr: &str, add: bool) -> DataItem {
        ip_data_item(protocfg, strings::IPV4_ADDRESS, addr.parse().unwrap(), add)
    }

    #[test]
    fn metric_last_write_wins() {
        let cfg = protocfg();
        let mut dd = DestinationData::new(mac(1), &[latency(&cfg, 100)], &cfg);
        dd.update(&[latency(&cfg, 200)], &cfg);
        dd.update(&[latency(&cfg, 300)], &cfg);
        let id = cfg.item_id(strings::LATENCY);
        assert_eq!(dd.metric(id), Some(&latency(&cfg, 300)));
        assert_eq!(dd.metric_data_items().len(), 1);
    }

    #[test]
    fn ip_add_is_idempotent() {
        let cfg = protocfg();
        let mut dd = DestinationData::new(mac(1), &[], &cfg);
        dd.update(&[ipv4(&cfg, "10.0.0.5/32", true)], &cfg);
        dd.update(&[ipv4(&cfg, "10.0.0.5/32", true)], &cfg);
        assert_eq!(dd.ip_data_items().len(), 1);
    }

    #[test]
    fn ip_remove() {
        let cfg = protocfg();
        let mut dd = DestinationData::new(
            mac(1),
            &[ipv4(&cfg, "10.0.0.5/32", true), ipv4(&cfg, "10.0.0.6/32", true)],
            &cfg,
        );
        dd.update(&[ipv4(&cfg, "10.0.0.5/32", false)], &cfg);
        assert_eq!(dd.ip_data_items().len(), 1);
        assert_eq!(
            dd.ip_data_items()[0].net(),
            Some("10.0.0.6/32".parse().unwrap())
        );
        // Removing an address that is not there is a no-op.
        dd.update(&[ipv4(&cfg, "10.0.0.7/32", false)], &cfg);
        assert_eq!(dd.ip_data_items().len(), 1);
    }

    #[test]
    fn non_metric_items_dropped_from_destination() {
        let cfg = protocfg();
        let status = DataItem::new(
            cfg.item_id(strings::STATUS),
            DataItemValue::Status {
                code: 0,
                text: String::new(),
            },
        );
        let dd = DestinationData::new(mac(1), &[status, latency(&cfg, 5)], &cfg);
        assert_eq!(dd.all_data_items().len(), 1);
    }

    #[test]
    fn ip_uniqueness_across_owners() {
        let cfg = protocfg();
        let mut ib = InfoBase::new(&cfg);
        ib.add_peer("p1", &[], &cfg);
        ib.peer_mut("p1").unwrap().add_destination(
            mac(1),
            &[ipv4(&cfg, "10.0.0.5/32", true)],
            &cfg,
        );

        let owner = ib.find_ip_owner(&ipv4(&cfg, "10.0.0.5/32", true));
        assert_eq!(owner, Some(format!("destination={}", mac(1))));

        // A second peer bringing up the same address must be rejected.
        ib.add_peer("p2", &[], &cfg);
        let err = ib
            .validate_ip_data_items(&[ipv4(&cfg, "10.0.0.5/32", true)], &[], &cfg)
            .unwrap_err();
        assert!(err.contains("already in use"));

        // Unknown addresses have no owner.
        assert_eq!(ib.find_ip_owner(&ipv4(&cfg, "10.9.9.9/32", true)), None);
    }

    #[test]
    fn validate_remove_requires_existing() {
        let cfg = protocfg();
        let ib = InfoBase::new(&cfg);
        let err = ib
            .validate_ip_data_items(&[ipv4(&cfg, "10.0.0.5/32", false)], &[], &cfg)
            .unwrap_err();
        assert!(err.contains("does not exist"));

        let existing = vec![ipv4(&cfg, "10.0.0.5/32", true)];
        assert!(
            ib.validate_ip_data_items(&[ipv4(&cfg, "10.0.0.5/32", false)], &existing, &cfg)
                .is_ok()
        );
    }

    #[test]
    fn peer_update_rejects_undeclared_metric_atomically() {
        let cfg = protocfg();
        let mut ib = InfoBase::new(&cfg);
        // Peer declared latency only.
        ib.add_peer("p1", &[latency(&cfg, 100)], &cfg);

        let rlq = DataItem::new(
            cfg.item_id(strings::RELATIVE_LINK_QUALITY_RX),
            DataItemValue::U8(50),
        );
        let status =
            ib.update_peer_items("p1", &[latency(&cfg, 200), rlq], &cfg);
        assert_eq!(status, strings::INVALID_MESSAGE);
        // Nothing applied, not even the declared metric.
        let pd = ib.peer("p1").unwrap();
        assert_eq!(
            pd.metric(cfg.item_id(strings::LATENCY)),
            Some(&latency(&cfg, 100))
        );
    }

    #[test]
    fn peer_update_cascades_to_destinations() {
        let cfg = protocfg();
        let mut ib = InfoBase::new(&cfg);
        ib.add_peer("p1", &[latency(&cfg, 100)], &cfg);
        let pd = ib.peer_mut("p1").unwrap();
        pd.add_destination(mac(1), &[latency(&cfg, 1)], &cfg);
        pd.add_destination(mac(2), &[], &cfg);

        let status = ib.update_peer_items("p1", &[latency(&cfg, 999)], &cfg);
        assert_eq!(status, strings::SUCCESS);

        let pd = ib.peer("p1").unwrap();
        let id = cfg.item_id(strings::LATENCY);
        assert_eq!(pd.metric(id), Some(&latency(&cfg, 999)));
        assert_eq!(pd.destination(mac(1)).unwrap().metric(id), Some(&latency(&cfg, 999)));
        assert_eq!(pd.destination(mac(2)).unwrap().metric(id), Some(&latency(&cfg, 999)));
    }

    #[test]
    fn local_peer_data_has_default_metrics() {
        let cfg = protocfg();
        let ib = InfoBase::new(&cfg);
        for id in cfg.metric_ids() {
            assert!(ib.local().has_metric(id));
        }
        // So a locally-originated peer update is always acceptable.
        let mut ib = ib;
        let status = ib
            .local_mut()
            .update_data_items(&[latency(&cfg, 777)], &cfg);
        assert_eq!(status, strings::SUCCESS);
    }

    #[test]
    fn duplicate_destination_rejected() {
        let cfg = protocfg();
        let mut pd = PeerData::new("p1", &[], &cfg);
        assert!(pd.add_destination(mac(1), &[], &cfg));
        assert!(!pd.add_destination(mac(1), &[], &cfg));
    }

    #[test]
    fn needs_response_bookkeeping() {
        let cfg = protocfg();
        let mut pd = PeerData::new("p1", &[], &cfg);
        pd.add_destination(mac(1), &[], &cfg);
        assert_eq!(pd.needs_response(mac(1)), "");
        pd.set_needs_response(mac(1), strings::DESTINATION_UP_RESPONSE);
        assert_eq!(pd.needs_response(mac(1)), strings::DESTINATION_UP_RESPONSE);
        pd.set_needs_response(mac(1), "");
        assert_eq!(pd.needs_response(mac(1)), "");
    }
}
