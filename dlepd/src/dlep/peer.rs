use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use serde::Serialize;
use strum_macros::{Display, EnumString};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use dlep_packet::{
    DataItem, DlepMac, ExtensionIdType, MAX_SIGNAL_SIZE, MESSAGE_HEADER_LEN, ProtocolConfig,
    ProtocolMessage, SignalIdType, peek_message_length, strings,
};

use crate::context::{Task, Timer};
use crate::dlep::client::{ClientEvent, PeerInfo};
use crate::dlep::timer::update_timers;
use crate::dlep::transaction::{PendingQueues, ResponseMatch, ResponsePending};
use crate::dlep::{DlepTop, Message};
use crate::{dlep_debug, dlep_error, dlep_info, dlep_warn};

/// State of the session with a peer.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Display, EnumString)]
pub enum PeerState {
    /// Returned by lookups for peers that are gone; a live Peer is never in
    /// this state.
    #[strum(serialize = "Nonexistent")]
    Nonexistent,
    /// TCP connection established, handshake not yet complete.
    #[strum(serialize = "Connected")]
    Connected,
    /// Handshake complete.
    #[strum(serialize = "InSession")]
    InSession,
    /// Session Termination sent; waiting for the response or the bounded
    /// termination timer.
    #[strum(serialize = "Terminating")]
    Terminating,
}

impl PeerState {
    pub fn is_in_session(&self) -> bool {
        *self == PeerState::InSession
    }
}

#[derive(Debug)]
pub enum Event {
    /// Peer object constructed; the router side opens the handshake.
    Start,
    /// A complete signal arrived.
    Signal(ProtocolMessage),
    /// The reader could not decode the byte stream.
    DecodeError(String),
    /// Socket read or write failed, or the peer closed the connection.
    ConnFail,
    HeartbeatTimerExpires,
    AcktivityTimerExpires,
    TerminationTimerExpires,
}

#[derive(Debug, Default)]
pub struct PeerTask {
    pub reader: Option<Task<()>>,
    pub writer: Option<Task<()>>,
}

#[derive(Debug, Default)]
pub struct PeerTimer {
    pub heartbeat: Option<Timer>,
    pub acktivity: Option<Timer>,
    pub termination: Option<Timer>,
}

#[derive(Serialize, Debug, Default, Clone, Copy)]
pub struct PeerCounter {
    pub sent: u64,
    pub rcvd: u64,
}

/// Session state for one peer.  The peer's data items and destinations live
/// in the information base under the same peer id; this struct owns only the
/// connection, the FSM, the timers, and the transaction queues.
#[derive(Debug)]
pub struct Peer {
    pub peer_id: String,
    pub remote: SocketAddr,
    pub state: PeerState,
    pub peer_type: String,
    pub tx: mpsc::Sender<Message>,
    pub packet_tx: Option<UnboundedSender<BytesMut>>,
    pub task: PeerTask,
    pub timer: PeerTimer,
    pub pending: PendingQueues,
    /// Heartbeat interval the peer declared, in catalogue units.
    pub peer_heartbeat_interval: u32,
    /// The same interval converted to seconds.
    pub peer_heartbeat_secs: u32,
    /// Last time any complete signal arrived from the peer.
    pub last_receive: Instant,
    pub mutual_extensions: Vec<ExtensionIdType>,
    /// Destinations this peer declined with Not Interested.  Cleared per MAC
    /// by a Destination Announce.
    pub not_interested_destinations: BTreeSet<DlepMac>,
    pub counters: BTreeMap<SignalIdType, PeerCounter>,
    /// Pre-built heartbeat; every heartbeat is identical.
    heartbeat_msg: BytesMut,
    heartbeat_signal: SignalIdType,
    pub terminate_reason: String,
}

impl Peer {
    pub fn new(
        peer_id: String,
        remote: SocketAddr,
        stream: TcpStream,
        tx: mpsc::Sender<Message>,
        protocfg: &Arc<ProtocolConfig>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (packet_tx, packet_rx) = mpsc::unbounded_channel::<BytesMut>();
        let heartbeat_signal = protocfg.signal_id(strings::HEARTBEAT);
        let heartbeat_msg = ProtocolMessage::new(heartbeat_signal).to_bytes();
        let mut peer = Peer {
            peer_id,
            remote,
            state: PeerState::Connected,
            peer_type: String::new(),
            tx,
            packet_tx: Some(packet_tx),
            task: PeerTask::default(),
            timer: PeerTimer::default(),
            pending: PendingQueues::default(),
            peer_heartbeat_interval: 0,
            peer_heartbeat_secs: 0,
            last_receive: Instant::now(),
            mutual_extensions: Vec::new(),
            not_interested_destinations: BTreeSet::new(),
            counters: BTreeMap::new(),
            heartbeat_msg,
            heartbeat_signal,
            terminate_reason: String::new(),
        };
        peer.task.reader = Some(peer_start_reader(&peer, read_half, protocfg.clone()));
        peer.task.writer = Some(peer_start_writer(write_half, packet_rx));
        peer
    }

    pub fn is_not_interested(&self, mac: &DlepMac) -> bool {
        self.not_interested_destinations.contains(mac)
    }

    fn count_sent(&mut self, signal: SignalIdType) {
        self.counters.entry(signal).or_default().sent += 1;
    }

    fn count_rcvd(&mut self, signal: SignalIdType) {
        self.counters.entry(signal).or_default().rcvd += 1;
    }

    /// Serialize and write a signal that needs no response.
    pub fn send_message(&mut self, protocfg: &ProtocolConfig, pm: &ProtocolMessage) {
        let Some(packet_tx) = self.packet_tx.as_ref() else {
            return;
        };
        dlep_debug!("peer={} send {}", self.peer_id, pm.name(protocfg));
        let _ = packet_tx.send(pm.to_bytes());
        self.count_sent(pm.signal);
    }

    /// Hand a request to the transaction layer; it goes out now or queues
    /// behind the in-flight request for the same destination.
    pub fn send_message_expecting_response(
        &mut self,
        protocfg: &ProtocolConfig,
        pm: &ProtocolMessage,
    ) {
        let Some(rp) = ResponsePending::new(protocfg, pm) else {
            dlep_error!(
                "peer={} signal {} does not expect a response",
                self.peer_id,
                pm.name(protocfg)
            );
            return;
        };
        self.count_sent(pm.signal);
        self.pending.enqueue(rp, self.packet_tx.as_ref());
    }

    pub fn send_heartbeat(&mut self) {
        let Some(packet_tx) = self.packet_tx.as_ref() else {
            return;
        };
        let _ = packet_tx.send(self.heartbeat_msg.clone());
        let signal = self.heartbeat_signal;
        self.count_sent(signal);
    }

    pub fn send_simple_response(
        &mut self,
        protocfg: &ProtocolConfig,
        response_name: &str,
        status_name: &str,
        status_text: &str,
        mac: Option<DlepMac>,
    ) {
        let mut pm = ProtocolMessage::for_signal(protocfg, response_name);
        if let Some(mac) = mac {
            pm.add_mac(protocfg, mac);
        }
        pm.add_status(protocfg, status_name, status_text);
        self.send_message(protocfg, &pm);
    }

    pub fn peer_info(&self) -> PeerInfo {
        PeerInfo {
            peer_id: self.peer_id.clone(),
            peer_type: self.peer_type.clone(),
            heartbeat_interval: self.peer_heartbeat_interval,
            extensions: self.mutual_extensions.clone(),
        }
    }
}

/// Active set of extensions: intersection of both sides' advertised ids.
pub fn intersect_extensions(
    local: &[ExtensionIdType],
    peer: &[ExtensionIdType],
) -> Vec<ExtensionIdType> {
    let peer_set: BTreeSet<ExtensionIdType> = peer.iter().copied().collect();
    local
        .iter()
        .copied()
        .filter(|ext| peer_set.contains(ext))
        .collect()
}

async fn peer_read(
    peer_id: String,
    tx: mpsc::Sender<Message>,
    mut read_half: OwnedReadHalf,
    protocfg: Arc<ProtocolConfig>,
) {
    let mut buf = BytesMut::with_capacity(MAX_SIGNAL_SIZE);
    loop {
        match read_half.read_buf(&mut buf).await {
            Ok(read_len) => {
                if read_len == 0 {
                    let _ = tx.try_send(Message::Event(peer_id.clone(), Event::ConnFail));
                    return;
                }
                while buf.len() >= MESSAGE_HEADER_LEN {
                    let total = peek_message_length(&buf);
                    if buf.len() < total {
                        break;
                    }
                    let mut remain = buf.split_off(total);
                    remain.reserve(MAX_SIGNAL_SIZE);

                    match ProtocolMessage::parse(&buf, &protocfg) {
                        Ok(pm) => {
                            let _ = tx
                                .send(Message::Event(peer_id.clone(), Event::Signal(pm)))
                                .await;
                        }
                        Err(err) => {
                            let _ = tx.try_send(Message::Event(
                                peer_id.clone(),
                                Event::DecodeError(err.to_string()),
                            ));
                            return;
                        }
                    }
                    buf = remain;
                }
            }
            Err(_) => {
                let _ = tx.send(Message::Event(peer_id.clone(), Event::ConnFail)).await;
                return;
            }
        }
    }
}

fn peer_start_reader(peer: &Peer, read_half: OwnedReadHalf, protocfg: Arc<ProtocolConfig>) -> Task<()> {
    let peer_id = peer.peer_id.clone();
    let tx = peer.tx.clone();
    Task::spawn(async move {
        peer_read(peer_id, tx, read_half, protocfg).await;
    })
}

fn peer_start_writer(mut write_half: OwnedWriteHalf, mut rx: UnboundedReceiver<BytesMut>) -> Task<()> {
    Task::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let _ = write_half.write_all(&msg).await;
        }
    })
}

/// FSM entry point: every per-peer event funnels through here on the
/// instance event loop.
pub fn fsm(top: &mut DlepTop, peers: &mut BTreeMap<String, Peer>, id: &str, event: Event) {
    match event {
        Event::Start => {
            let Some(peer) = peers.get_mut(id) else { return };
            if !top.config.is_modem {
                peer_send_session_initialization(top, peer);
            }
            update_timers(top.config, top.protocfg, peer);
        }
        Event::Signal(pm) => handle_signal(top, peers, id, pm),
        Event::DecodeError(err) => {
            let Some(peer) = peers.get_mut(id) else { return };
            dlep_error!("peer={} decode error: {}", id, err);
            peer_terminate(top, peer, strings::INVALID_MESSAGE, &err);
        }
        Event::ConnFail => {
            dlep_warn!("peer={} transport failure", id);
            destroy_peer(top, peers, id, "transport failure");
        }
        Event::HeartbeatTimerExpires => {
            let Some(peer) = peers.get_mut(id) else { return };
            peer.send_heartbeat();
        }
        Event::AcktivityTimerExpires => handle_acktivity_timeout(top, peers, id),
        Event::TerminationTimerExpires => {
            dlep_warn!("peer={} termination wait expired", id);
            destroy_peer(top, peers, id, "termination timeout");
        }
    }
}

fn handle_signal(top: &mut DlepTop, peers: &mut BTreeMap<String, Peer>, id: &str, pm: ProtocolMessage) {
    let state = {
        let Some(peer) = peers.get_mut(id) else { return };
        peer.last_receive = Instant::now();
        peer.count_rcvd(pm.signal);
        peer.state
    };
    let Some(name) = top.protocfg.signal_name(pm.signal) else {
        let Some(peer) = peers.get_mut(id) else { return };
        peer_terminate(top, peer, strings::INVALID_MESSAGE, "unknown signal");
        return;
    };
    dlep_debug!("peer={} recv {}", id, name);

    use PeerState::*;
    match (state, name) {
        (Connected, strings::SESSION_INITIALIZATION) if top.config.is_modem => {
            handle_session_initialization(top, peers, id, pm)
        }
        (Connected, strings::SESSION_INITIALIZATION_RESPONSE) if !top.config.is_modem => {
            handle_session_initialization_response(top, peers, id, pm)
        }
        (Connected, strings::SESSION_TERMINATION) | (InSession, strings::SESSION_TERMINATION) => {
            handle_session_termination(top, peers, id, pm)
        }
        (InSession, strings::SESSION_UPDATE) => handle_session_update(top, peers, id, pm),
        (InSession, strings::SESSION_UPDATE_RESPONSE) => {
            handle_session_update_response(top, peers, id, pm)
        }
        (InSession, strings::DESTINATION_UP) => handle_destination_up(top, peers, id, pm),
        (InSession, strings::DESTINATION_UP_RESPONSE) => {
            handle_destination_up_response(top, peers, id, pm)
        }
        (InSession, strings::DESTINATION_ANNOUNCE) => {
            handle_destination_announce(top, peers, id, pm)
        }
        (InSession, strings::DESTINATION_ANNOUNCE_RESPONSE) => {
            handle_destination_announce_response(top, peers, id, pm)
        }
        (InSession, strings::DESTINATION_UPDATE) => handle_destination_update(top, peers, id, pm),
        (InSession, strings::DESTINATION_DOWN) => handle_destination_down(top, peers, id, pm),
        (InSession, strings::DESTINATION_DOWN_RESPONSE) => {
            handle_destination_down_response(top, peers, id, pm)
        }
        (InSession, strings::LINK_CHARACTERISTICS_REQUEST) => {
            handle_link_characteristics_request(top, peers, id, pm)
        }
        (InSession, strings::LINK_CHARACTERISTICS_RESPONSE) => {
            handle_link_characteristics_response(top, peers, id, pm)
        }
        (InSession, strings::HEARTBEAT) => {
            // Nothing beyond the last_receive refresh above.
        }
        (Terminating, strings::SESSION_TERMINATION_RESPONSE) => {
            destroy_peer(top, peers, id, "termination complete");
        }
        (Terminating, _) => {
            dlep_debug!("peer={} dropping {} while terminating", id, name);
        }
        _ => {
            let Some(peer) = peers.get_mut(id) else { return };
            dlep_error!("peer={} unexpected {} in state {}", id, name, state);
            peer_terminate(
                top,
                peer,
                strings::INVALID_MESSAGE,
                &format!("unexpected {}", name),
            );
        }
    }
}

/// Router side: open the handshake with our session parameters and the full
/// local peer-data.
fn peer_send_session_initialization(top: &mut DlepTop, peer: &mut Peer) {
    let mut pm = ProtocolMessage::for_signal(top.protocfg, strings::SESSION_INITIALIZATION);
    pm.add_heartbeat_interval(top.protocfg, top.config.heartbeat_interval);
    pm.add_extensions(top.protocfg, &top.config.supported_extensions);
    pm.add_peer_type(top.protocfg, &top.config.peer_type);
    pm.add_data_items(top.info_base.local().data_items());
    dlep_info!("peer={} sending session initialization", peer.peer_id);
    peer.send_message_expecting_response(top.protocfg, &pm);
}

/// Modem side of the handshake.
fn handle_session_initialization(
    top: &mut DlepTop,
    peers: &mut BTreeMap<String, Peer>,
    id: &str,
    pm: ProtocolMessage,
) {
    let Some(peer) = peers.get_mut(id) else { return };
    let Some(units) = pm.heartbeat_interval(top.protocfg) else {
        peer_terminate(
            top,
            peer,
            strings::INVALID_MESSAGE,
            "session initialization without heartbeat interval",
        );
        return;
    };

    let items = pm.metric_and_ip_items(top.protocfg);
    if let Err(err) = top.info_base.validate_ip_data_items(&items, &[], top.protocfg) {
        let mut response =
            ProtocolMessage::for_signal(top.protocfg, strings::SESSION_INITIALIZATION_RESPONSE);
        response.add_status(top.protocfg, strings::INCONSISTENT_DATA, &err);
        peer.send_message(top.protocfg, &response);
        peer_terminate(top, peer, strings::INCONSISTENT_DATA, &err);
        return;
    }

    peer.peer_heartbeat_interval = units;
    peer.peer_heartbeat_secs = top.protocfg.heartbeat_interval_secs(units);
    peer.mutual_extensions = intersect_extensions(
        &top.config.supported_extensions,
        &pm.extensions(top.protocfg),
    );
    if let Some(peer_type) = pm.peer_type(top.protocfg) {
        peer.peer_type = peer_type.to_string();
    }

    // The peer's metric declarations become the whitelist for later updates.
    top.info_base.add_peer(id, &items, top.protocfg);

    let mut response =
        ProtocolMessage::for_signal(top.protocfg, strings::SESSION_INITIALIZATION_RESPONSE);
    response.add_status(top.protocfg, strings::SUCCESS, "");
    response.add_heartbeat_interval(top.protocfg, top.config.heartbeat_interval);
    response.add_extensions(top.protocfg, &peer.mutual_extensions);
    response.add_peer_type(top.protocfg, &top.config.peer_type);
    response.add_data_items(top.info_base.local().data_items());
    peer.send_message(top.protocfg, &response);

    enter_in_session(top, peer);
}

/// Router side of the handshake.
fn handle_session_initialization_response(
    top: &mut DlepTop,
    peers: &mut BTreeMap<String, Peer>,
    id: &str,
    pm: ProtocolMessage,
) {
    let Some(peer) = peers.get_mut(id) else { return };
    let matched = peer
        .pending
        .handle_response(pm.signal, DlepMac::SESSION, peer.packet_tx.as_ref());
    if matched != ResponseMatch::Matched {
        peer_terminate(
            top,
            peer,
            strings::INVALID_MESSAGE,
            "unexpected session initialization response",
        );
        return;
    }

    let Some((code, text)) = pm.status(top.protocfg) else {
        peer_terminate(
            top,
            peer,
            strings::INVALID_MESSAGE,
            "session initialization response without status",
        );
        return;
    };
    if code != top.protocfg.status_code(strings::SUCCESS) {
        let reason = format!(
            "peer refused session: {} {}",
            top.protocfg.status_name(code),
            text
        );
        peer_terminate(top, peer, strings::SHUTTING_DOWN, &reason);
        return;
    }

    let Some(units) = pm.heartbeat_interval(top.protocfg) else {
        peer_terminate(
            top,
            peer,
            strings::INVALID_MESSAGE,
            "session initialization response without heartbeat interval",
        );
        return;
    };

    let items = pm.metric_and_ip_items(top.protocfg);
    if let Err(err) = top.info_base.validate_ip_data_items(&items, &[], top.protocfg) {
        peer_terminate(top, peer, strings::INCONSISTENT_DATA, &err);
        return;
    }

    peer.peer_heartbeat_interval = units;
    peer.peer_heartbeat_secs = top.protocfg.heartbeat_interval_secs(units);
    peer.mutual_extensions = intersect_extensions(
        &top.config.supported_extensions,
        &pm.extensions(top.protocfg),
    );
    if let Some(peer_type) = pm.peer_type(top.protocfg) {
        peer.peer_type = peer_type.to_string();
    }

    top.info_base.add_peer(id, &items, top.protocfg);

    enter_in_session(top, peer);
}

/// Shared transition into the in-session state: arm timers, notify the
/// embedder, and seed the peer with every locally-owned destination.
fn enter_in_session(top: &mut DlepTop, peer: &mut Peer) {
    peer.state = PeerState::InSession;
    update_timers(top.config, top.protocfg, peer);
    dlep_info!(
        "peer={} session established, heartbeat {}s",
        peer.peer_id,
        peer.peer_heartbeat_secs
    );
    let _ = top.client_tx.send(ClientEvent::PeerUp {
        peer_info: peer.peer_info(),
    });

    let locals: Vec<(DlepMac, Vec<DataItem>)> = top
        .info_base
        .local()
        .destinations()
        .map(|(mac, dd)| (*mac, dd.all_data_items()))
        .collect();
    for (mac, items) in locals {
        peer_send_destination_up(top, peer, mac, items);
    }
}

pub fn peer_send_destination_up(
    top: &mut DlepTop,
    peer: &mut Peer,
    mac: DlepMac,
    items: Vec<DataItem>,
) {
    let mut pm = ProtocolMessage::for_signal(top.protocfg, strings::DESTINATION_UP);
    pm.add_mac(top.protocfg, mac);
    pm.add_data_items(items);
    peer.send_message_expecting_response(top.protocfg, &pm);
}

fn handle_session_update(
    top: &mut DlepTop,
    peers: &mut BTreeMap<String, Peer>,
    id: &str,
    pm: ProtocolMessage,
) {
    let Some(peer) = peers.get_mut(id) else { return };
    let items = pm.metric_and_ip_items(top.protocfg);
    let existing: Vec<DataItem> = top
        .info_base
        .peer(id)
        .map(|pd| pd.ip_data_items().to_vec())
        .unwrap_or_default();

    let status_name = match top
        .info_base
        .validate_ip_data_items(&items, &existing, top.protocfg)
    {
        Ok(()) => top.info_base.update_peer_items(id, &items, top.protocfg),
        Err(err) => {
            dlep_error!("peer={} session update: {}", id, err);
            strings::INCONSISTENT_DATA
        }
    };

    peer.send_simple_response(
        top.protocfg,
        strings::SESSION_UPDATE_RESPONSE,
        status_name,
        "",
        None,
    );

    if status_name == strings::SUCCESS {
        let _ = top.client_tx.send(ClientEvent::PeerUpdate {
            peer_id: id.to_string(),
            data_items: items,
        });
    }
}

fn handle_session_update_response(
    top: &mut DlepTop,
    peers: &mut BTreeMap<String, Peer>,
    id: &str,
    pm: ProtocolMessage,
) {
    let Some(peer) = peers.get_mut(id) else { return };
    let matched = peer
        .pending
        .handle_response(pm.signal, DlepMac::SESSION, peer.packet_tx.as_ref());
    if matched != ResponseMatch::Matched {
        peer_terminate(
            top,
            peer,
            strings::INVALID_MESSAGE,
            "unexpected session update response",
        );
        return;
    }
    if let Some((code, text)) = pm.status(top.protocfg) {
        if code != top.protocfg.status_code(strings::SUCCESS) {
            dlep_warn!(
                "peer={} rejected session update: {} {}",
                id,
                top.protocfg.status_name(code),
                text
            );
        }
    }
}

fn handle_destination_up(
    top: &mut DlepTop,
    peers: &mut BTreeMap<String, Peer>,
    id: &str,
    pm: ProtocolMessage,
) {
    let uninterested = top.config.uninterested();
    let Some(peer) = peers.get_mut(id) else { return };
    let Some(mac) = pm.mac(top.protocfg) else {
        peer_terminate(
            top,
            peer,
            strings::INVALID_MESSAGE,
            "destination up without mac address",
        );
        return;
    };

    if uninterested.contains(&mac) {
        dlep_info!("peer={} destination {} declined", id, mac);
        peer.send_simple_response(
            top.protocfg,
            strings::DESTINATION_UP_RESPONSE,
            strings::NOT_INTERESTED,
            "",
            Some(mac),
        );
        return;
    }

    let items = pm.metric_and_ip_items(top.protocfg);

    // Validate the whole item set before constructing the destination, so a
    // conflicting address rejects it atomically.
    if let Err(err) = top.info_base.validate_ip_data_items(&items, &[], top.protocfg) {
        dlep_error!("peer={} destination up {}: {}", id, mac, err);
        peer.send_simple_response(
            top.protocfg,
            strings::DESTINATION_UP_RESPONSE,
            strings::INCONSISTENT_DATA,
            &err,
            Some(mac),
        );
        return;
    }

    {
        let Some(pd) = top.info_base.peer_mut(id) else {
            peer_terminate(top, peer, strings::INVALID_MESSAGE, "no peer data");
            return;
        };
        if !pd.add_destination(mac, &items, top.protocfg) {
            peer.send_simple_response(
                top.protocfg,
                strings::DESTINATION_UP_RESPONSE,
                strings::INVALID_DESTINATION,
                "destination already exists",
                Some(mac),
            );
            return;
        }
        pd.set_needs_response(mac, strings::DESTINATION_UP_RESPONSE);
    }

    peer.send_simple_response(
        top.protocfg,
        strings::DESTINATION_UP_RESPONSE,
        strings::SUCCESS,
        "",
        Some(mac),
    );
    if let Some(pd) = top.info_base.peer_mut(id) {
        pd.set_needs_response(mac, "");
    }

    let _ = top.client_tx.send(ClientEvent::DestinationUp {
        peer_id: id.to_string(),
        mac,
        data_items: items.clone(),
    });

    propagate_destination_up(top, peers, id, mac, items);
}

fn handle_destination_up_response(
    top: &mut DlepTop,
    peers: &mut BTreeMap<String, Peer>,
    id: &str,
    pm: ProtocolMessage,
) {
    let Some(peer) = peers.get_mut(id) else { return };
    let Some(mac) = pm.mac(top.protocfg) else {
        peer_terminate(
            top,
            peer,
            strings::INVALID_MESSAGE,
            "destination up response without mac address",
        );
        return;
    };
    let matched = peer
        .pending
        .handle_response(pm.signal, mac, peer.packet_tx.as_ref());
    if matched != ResponseMatch::Matched {
        peer_terminate(
            top,
            peer,
            strings::INVALID_MESSAGE,
            "unexpected destination up response",
        );
        return;
    }
    if let Some((code, _)) = pm.status(top.protocfg) {
        if code == top.protocfg.status_code(strings::NOT_INTERESTED) {
            dlep_info!("peer={} not interested in destination {}", id, mac);
            peer.not_interested_destinations.insert(mac);
        }
    }
}

fn handle_destination_announce(
    top: &mut DlepTop,
    peers: &mut BTreeMap<String, Peer>,
    id: &str,
    pm: ProtocolMessage,
) {
    let Some(peer) = peers.get_mut(id) else { return };
    let Some(mac) = pm.mac(top.protocfg) else {
        peer_terminate(
            top,
            peer,
            strings::INVALID_MESSAGE,
            "destination announce without mac address",
        );
        return;
    };

    if peer.not_interested_destinations.remove(&mac) {
        dlep_info!("peer={} interested again in destination {}", id, mac);
    }
    peer.send_simple_response(
        top.protocfg,
        strings::DESTINATION_ANNOUNCE_RESPONSE,
        strings::SUCCESS,
        "",
        Some(mac),
    );

    // If the announced destination is ours, bring the peer up to date.
    let local_items = top
        .info_base
        .local()
        .destination(mac)
        .map(|dd| dd.all_data_items());
    if let Some(items) = local_items {
        peer_send_destination_up(top, peer, mac, items);
    }
}

fn handle_destination_announce_response(
    top: &mut DlepTop,
    peers: &mut BTreeMap<String, Peer>,
    id: &str,
    pm: ProtocolMessage,
) {
    let Some(peer) = peers.get_mut(id) else { return };
    let Some(mac) = pm.mac(top.protocfg) else {
        peer_terminate(
            top,
            peer,
            strings::INVALID_MESSAGE,
            "destination announce response without mac address",
        );
        return;
    };
    let matched = peer
        .pending
        .handle_response(pm.signal, mac, peer.packet_tx.as_ref());
    if matched != ResponseMatch::Matched {
        peer_terminate(
            top,
            peer,
            strings::INVALID_MESSAGE,
            "unexpected destination announce response",
        );
    }
}

fn handle_destination_update(
    top: &mut DlepTop,
    peers: &mut BTreeMap<String, Peer>,
    id: &str,
    pm: ProtocolMessage,
) {
    let Some(peer) = peers.get_mut(id) else { return };
    let Some(mac) = pm.mac(top.protocfg) else {
        peer_terminate(
            top,
            peer,
            strings::INVALID_MESSAGE,
            "destination update without mac address",
        );
        return;
    };

    let known = top
        .info_base
        .peer(id)
        .map(|pd| pd.valid_destination(mac))
        .unwrap_or(false);
    if !known {
        peer_terminate(
            top,
            peer,
            strings::INVALID_MESSAGE,
            &format!("update for unknown destination {}", mac),
        );
        return;
    }

    let items = pm.metric_and_ip_items(top.protocfg);
    let existing: Vec<DataItem> = top
        .info_base
        .peer(id)
        .and_then(|pd| pd.destination(mac))
        .map(|dd| dd.ip_data_items().to_vec())
        .unwrap_or_default();
    if let Err(err) = top
        .info_base
        .validate_ip_data_items(&items, &existing, top.protocfg)
    {
        // No response is defined for Destination Update; drop the batch
        // without mutating anything.
        dlep_error!("peer={} destination update {}: {}", id, mac, err);
        return;
    }

    if let Some(pd) = top.info_base.peer_mut(id) {
        pd.update_destination(mac, &items, top.protocfg);
    }

    let _ = top.client_tx.send(ClientEvent::DestinationUpdate {
        peer_id: id.to_string(),
        mac,
        data_items: items.clone(),
    });

    propagate_destination_update(top, peers, id, mac, items);
}

fn handle_destination_down(
    top: &mut DlepTop,
    peers: &mut BTreeMap<String, Peer>,
    id: &str,
    pm: ProtocolMessage,
) {
    let Some(peer) = peers.get_mut(id) else { return };
    let Some(mac) = pm.mac(top.protocfg) else {
        peer_terminate(
            top,
            peer,
            strings::INVALID_MESSAGE,
            "destination down without mac address",
        );
        return;
    };

    let removed = top
        .info_base
        .peer_mut(id)
        .map(|pd| pd.remove_destination(mac))
        .unwrap_or(false);
    let status_name = if removed {
        strings::SUCCESS
    } else {
        strings::INVALID_DESTINATION
    };
    peer.send_simple_response(
        top.protocfg,
        strings::DESTINATION_DOWN_RESPONSE,
        status_name,
        "",
        Some(mac),
    );

    if removed {
        let _ = top.client_tx.send(ClientEvent::DestinationDown {
            peer_id: id.to_string(),
            mac,
        });
        propagate_destination_down(top, peers, id, mac);
    }
}

fn handle_destination_down_response(
    top: &mut DlepTop,
    peers: &mut BTreeMap<String, Peer>,
    id: &str,
    pm: ProtocolMessage,
) {
    let Some(peer) = peers.get_mut(id) else { return };
    let Some(mac) = pm.mac(top.protocfg) else {
        peer_terminate(
            top,
            peer,
            strings::INVALID_MESSAGE,
            "destination down response without mac address",
        );
        return;
    };
    let matched = peer
        .pending
        .handle_response(pm.signal, mac, peer.packet_tx.as_ref());
    if matched != ResponseMatch::Matched {
        peer_terminate(
            top,
            peer,
            strings::INVALID_MESSAGE,
            "unexpected destination down response",
        );
    }
    // The local store dropped the destination when the down was issued; any
    // status from the peer completes the transaction either way.
}

/// Modem side: apply the requested link characteristics to our destination
/// and answer with its full current metric set.
fn handle_link_characteristics_request(
    top: &mut DlepTop,
    peers: &mut BTreeMap<String, Peer>,
    id: &str,
    pm: ProtocolMessage,
) {
    let Some(peer) = peers.get_mut(id) else { return };
    let Some(mac) = pm.mac(top.protocfg) else {
        peer_terminate(
            top,
            peer,
            strings::INVALID_MESSAGE,
            "link characteristics request without mac address",
        );
        return;
    };

    if !top.info_base.local().valid_destination(mac) {
        peer.send_simple_response(
            top.protocfg,
            strings::LINK_CHARACTERISTICS_RESPONSE,
            strings::INVALID_DESTINATION,
            "",
            Some(mac),
        );
        return;
    }

    let items = pm.metric_and_ip_items(top.protocfg);
    top.info_base
        .local_mut()
        .update_destination(mac, &items, top.protocfg);
    let metrics = top
        .info_base
        .local()
        .destination(mac)
        .map(|dd| dd.metric_data_items())
        .unwrap_or_default();

    let mut response =
        ProtocolMessage::for_signal(top.protocfg, strings::LINK_CHARACTERISTICS_RESPONSE);
    response.add_mac(top.protocfg, mac);
    response.add_data_items(metrics);
    peer.send_message(top.protocfg, &response);

    let _ = top.client_tx.send(ClientEvent::DestinationUpdate {
        peer_id: id.to_string(),
        mac,
        data_items: items,
    });
}

fn handle_link_characteristics_response(
    top: &mut DlepTop,
    peers: &mut BTreeMap<String, Peer>,
    id: &str,
    pm: ProtocolMessage,
) {
    let Some(peer) = peers.get_mut(id) else { return };
    let Some(mac) = pm.mac(top.protocfg) else {
        peer_terminate(
            top,
            peer,
            strings::INVALID_MESSAGE,
            "link characteristics response without mac address",
        );
        return;
    };
    let matched = peer
        .pending
        .handle_response(pm.signal, mac, peer.packet_tx.as_ref());
    if matched != ResponseMatch::Matched {
        peer_terminate(
            top,
            peer,
            strings::INVALID_MESSAGE,
            "unexpected link characteristics response",
        );
        return;
    }

    let items = pm.metric_and_ip_items(top.protocfg);
    let applied = top
        .info_base
        .peer_mut(id)
        .and_then(|pd| pd.update_destination(mac, &items, top.protocfg))
        .is_some();
    if applied {
        let _ = top.client_tx.send(ClientEvent::DestinationUpdate {
            peer_id: id.to_string(),
            mac,
            data_items: items,
        });
    }
}

fn handle_session_termination(
    top: &mut DlepTop,
    peers: &mut BTreeMap<String, Peer>,
    id: &str,
    pm: ProtocolMessage,
) {
    let Some(peer) = peers.get_mut(id) else { return };
    let reason = match pm.status(top.protocfg) {
        Some((code, text)) if !text.is_empty() => {
            format!("{} {}", top.protocfg.status_name(code), text)
        }
        Some((code, _)) => top.protocfg.status_name(code).to_string(),
        None => "no status".to_string(),
    };
    dlep_info!("peer={} terminated the session: {}", id, reason);
    peer.send_simple_response(
        top.protocfg,
        strings::SESSION_TERMINATION_RESPONSE,
        strings::SUCCESS,
        "",
        None,
    );

    peer.state = PeerState::Terminating;
    peer.terminate_reason = format!("peer terminated session: {}", reason);
    peer.pending.clear();
    // The bounded termination wait gives the response time to flush, then
    // destroys the peer.
    update_timers(top.config, top.protocfg, peer);
}

/// Acktivity fire: retransmit overdue requests and enforce the liveness
/// deadline.
fn handle_acktivity_timeout(top: &mut DlepTop, peers: &mut BTreeMap<String, Peer>, id: &str) {
    let retry_interval = Duration::from_secs(top.config.retry_interval_seconds.max(1));
    let Some(peer) = peers.get_mut(id) else { return };
    if peer.state == PeerState::Terminating {
        return;
    }

    let sweep =
        peer.pending
            .check_retransmits(retry_interval, top.config.max_retries, peer.packet_tx.as_ref());
    if let Some(queue_name) = sweep.expired {
        peer_terminate(
            top,
            peer,
            strings::TIMED_OUT,
            &format!("no response for {}", queue_name),
        );
        return;
    }

    if peer.peer_heartbeat_secs > 0 {
        let deadline = Duration::from_secs(
            peer.peer_heartbeat_secs as u64 * top.config.missed_heartbeat_threshold.max(1) as u64,
        );
        if peer.last_receive.elapsed() > deadline {
            peer_terminate(top, peer, strings::TIMED_OUT, "no activity from peer");
        }
    }
}

fn propagate_destination_up(
    top: &mut DlepTop,
    peers: &mut BTreeMap<String, Peer>,
    origin: &str,
    mac: DlepMac,
    items: Vec<DataItem>,
) {
    for (peer_id, other) in peers.iter_mut() {
        if peer_id == origin || !other.state.is_in_session() || other.is_not_interested(&mac) {
            continue;
        }
        let mut pm = ProtocolMessage::for_signal(top.protocfg, strings::DESTINATION_UP);
        pm.add_mac(top.protocfg, mac);
        pm.add_data_items(items.clone());
        other.send_message_expecting_response(top.protocfg, &pm);
    }
}

fn propagate_destination_update(
    top: &mut DlepTop,
    peers: &mut BTreeMap<String, Peer>,
    origin: &str,
    mac: DlepMac,
    items: Vec<DataItem>,
) {
    for (peer_id, other) in peers.iter_mut() {
        if peer_id == origin || !other.state.is_in_session() || other.is_not_interested(&mac) {
            continue;
        }
        let mut pm = ProtocolMessage::for_signal(top.protocfg, strings::DESTINATION_UPDATE);
        pm.add_mac(top.protocfg, mac);
        pm.add_data_items(items.clone());
        other.send_message(top.protocfg, &pm);
    }
}

fn propagate_destination_down(
    top: &mut DlepTop,
    peers: &mut BTreeMap<String, Peer>,
    origin: &str,
    mac: DlepMac,
) {
    for (peer_id, other) in peers.iter_mut() {
        if peer_id == origin || !other.state.is_in_session() || other.is_not_interested(&mac) {
            continue;
        }
        let mut pm = ProtocolMessage::for_signal(top.protocfg, strings::DESTINATION_DOWN);
        pm.add_mac(top.protocfg, mac);
        other.send_message_expecting_response(top.protocfg, &pm);
    }
}

/// Send a Session Termination with the given status and enter the
/// terminating state.  The peer is destroyed when the response arrives or
/// the bounded termination timer fires, whichever comes first.
pub fn peer_terminate(top: &mut DlepTop, peer: &mut Peer, status_name: &str, reason: &str) {
    if peer.state == PeerState::Terminating {
        return;
    }
    dlep_warn!(
        "peer={} terminating: {} ({})",
        peer.peer_id,
        status_name,
        reason
    );
    let mut pm = ProtocolMessage::for_signal(top.protocfg, strings::SESSION_TERMINATION);
    pm.add_status(top.protocfg, status_name, reason);
    peer.send_message(top.protocfg, &pm);

    peer.state = PeerState::Terminating;
    peer.terminate_reason = if reason.is_empty() {
        status_name.to_string()
    } else {
        format!("{}: {}", status_name, reason)
    };
    peer.pending.clear();
    update_timers(top.config, top.protocfg, peer);
}

/// Tear a peer down completely: drop its timers and socket tasks, remove its
/// data from the information base, and notify the embedder.
pub fn destroy_peer(top: &mut DlepTop, peers: &mut BTreeMap<String, Peer>, id: &str, reason: &str) {
    let Some(peer) = peers.remove(id) else { return };
    top.info_base.remove_peer(id);
    let reason = if peer.terminate_reason.is_empty() {
        reason.to_string()
    } else {
        peer.terminate_reason.clone()
    };
    dlep_info!("peer={} destroyed: {}", id, reason);
    let _ = top.client_tx.send(ClientEvent::PeerDown {
        peer_id: id.to_string(),
        reason,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_intersection() {
        assert_eq!(intersect_extensions(&[1, 2, 3], &[2, 3, 4]), vec![2, 3]);
        assert_eq!(intersect_extensions(&[], &[1]), Vec::<u16>::new());
        assert_eq!(intersect_extensions(&[1], &[]), Vec::<u16>::new());
    }

    #[test]
    fn state_display() {
        assert_eq!(PeerState::InSession.to_string(), "InSession");
        assert!(PeerState::InSession.is_in_session());
        assert!(!PeerState::Terminating.is_in_session());
    }
}
