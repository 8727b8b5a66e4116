use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};

use dlep_packet::{DataItem, DlepMac, ProtocolConfig, ProtocolMessage, strings};

use crate::context::Task;
use crate::dlep::client::{ClientCommand, ClientEvent};
use crate::dlep::config::DlepConfig;
use crate::dlep::infobase::InfoBase;
use crate::dlep::peer::{self, Event, Peer, PeerState};
use crate::{dlep_error, dlep_info, dlep_warn};

/// Everything the event loop can be asked to do.  Client commands arrive on
/// the same channel as socket and timer events, so all state mutation is
/// serialized.
#[derive(Debug)]
pub enum Message {
    Event(String, Event),
    Accept(TcpStream, SocketAddr),
    Connect(TcpStream, SocketAddr),
    ConnectFail(String),
    Client(ClientCommand),
}

/// Borrow bundle handed to FSM handlers: every instance field a handler may
/// touch except the peer map, which is passed separately so handlers can
/// hold one peer mutably while consulting the rest.
pub struct DlepTop<'a> {
    pub config: &'a DlepConfig,
    pub protocfg: &'a Arc<ProtocolConfig>,
    pub info_base: &'a mut InfoBase,
    pub client_tx: &'a UnboundedSender<ClientEvent>,
}

/// One DLEP instance: the peer registry, the information base, and the
/// channel feeding the single event loop.
pub struct Dlep {
    pub config: DlepConfig,
    pub protocfg: Arc<ProtocolConfig>,
    pub peers: BTreeMap<String, Peer>,
    pub info_base: InfoBase,
    pub tx: mpsc::Sender<Message>,
    pub rx: mpsc::Receiver<Message>,
    pub client_tx: UnboundedSender<ClientEvent>,
    pub listen_task: Option<Task<()>>,
    pub listen_task6: Option<Task<()>>,
    pub connect_task: Option<Task<()>>,
    pub listen_err: Option<anyhow::Error>,
}

/// A peer is identified by the remote endpoint of its session.
pub fn peer_id_from_endpoint(sockaddr: &SocketAddr) -> String {
    format!("{}:{}", sockaddr.ip(), sockaddr.port())
}

/// Create an IPv6-only TCP listener to avoid conflicts with IPv4 binding
fn create_ipv6_listener(port: u16) -> Result<TcpListener, std::io::Error> {
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;

    socket.set_only_v6(true)?;
    socket.set_reuse_address(true)?;

    let addr = format!("[::]:{}", port).parse::<SocketAddr>().unwrap();
    socket.bind(&addr.into())?;
    socket.listen(128)?;

    let std_listener: std::net::TcpListener = socket.into();
    std_listener.set_nonblocking(true)?;
    TcpListener::from_std(std_listener)
}

impl Dlep {
    pub fn new(
        config: DlepConfig,
        protocfg: Arc<ProtocolConfig>,
        client_tx: UnboundedSender<ClientEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(4096);
        let info_base = InfoBase::new(&protocfg);
        Dlep {
            config,
            protocfg,
            peers: BTreeMap::new(),
            info_base,
            tx,
            rx,
            client_tx,
            listen_task: None,
            listen_task6: None,
            connect_task: None,
            listen_err: None,
        }
    }

    /// Current state of a peer; gone peers read as Nonexistent.
    pub fn peer_state(&self, peer_id: &str) -> PeerState {
        self.peers
            .get(peer_id)
            .map(|peer| peer.state)
            .unwrap_or(PeerState::Nonexistent)
    }

    pub async fn listen(&mut self) -> anyhow::Result<()> {
        let port = self.config.session_port;
        let mut ipv4_bound = false;
        let mut ipv6_bound = false;

        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => {
                ipv4_bound = true;
                let tx = self.tx.clone();
                self.listen_task = Some(Task::spawn(async move {
                    loop {
                        match listener.accept().await {
                            Ok((socket, sockaddr)) => {
                                if tx.send(Message::Accept(socket, sockaddr)).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                dlep_error!("IPv4 accept error: {}", err);
                                // Back off so accept errors cannot spin.
                                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                            }
                        }
                    }
                }));
            }
            Err(err) => {
                dlep_error!("failed to bind 0.0.0.0:{}: {}", port, err);
            }
        }

        match create_ipv6_listener(port) {
            Ok(listener) => {
                ipv6_bound = true;
                let tx = self.tx.clone();
                self.listen_task6 = Some(Task::spawn(async move {
                    loop {
                        match listener.accept().await {
                            Ok((socket, sockaddr)) => {
                                if tx.send(Message::Accept(socket, sockaddr)).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                dlep_error!("IPv6 accept error: {}", err);
                                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                            }
                        }
                    }
                }));
            }
            Err(err) => {
                dlep_error!("failed to bind [::]:{}: {}", port, err);
            }
        }

        if !ipv4_bound && !ipv6_bound {
            return Err(anyhow::anyhow!("failed to bind any session listener"));
        }
        Ok(())
    }

    /// Actively open the session configured in `connect`, reporting the
    /// outcome into the event loop.
    pub fn start_connect(&mut self) {
        let Some(addr) = self.config.connect.clone() else {
            return;
        };
        let tx = self.tx.clone();
        self.connect_task = Some(Task::spawn(async move {
            match TcpStream::connect(addr.clone()).await {
                Ok(stream) => match stream.peer_addr() {
                    Ok(sockaddr) => {
                        let _ = tx.send(Message::Connect(stream, sockaddr)).await;
                    }
                    Err(_) => {
                        let _ = tx.send(Message::ConnectFail(addr)).await;
                    }
                },
                Err(err) => {
                    dlep_error!("connect to {} failed: {}", addr, err);
                    let _ = tx.send(Message::ConnectFail(addr)).await;
                }
            }
        }));
    }

    fn make_peer(&mut self, stream: TcpStream, sockaddr: SocketAddr) {
        let peer_id = peer_id_from_endpoint(&sockaddr);
        if self.peers.contains_key(&peer_id) {
            dlep_warn!("peer={} already exists, dropping new connection", peer_id);
            return;
        }
        dlep_info!("peer={} connected", peer_id);
        let peer = Peer::new(
            peer_id.clone(),
            sockaddr,
            stream,
            self.tx.clone(),
            &self.protocfg,
        );
        self.peers.insert(peer_id.clone(), peer);

        let mut top = DlepTop {
            config: &self.config,
            protocfg: &self.protocfg,
            info_base: &mut self.info_base,
            client_tx: &self.client_tx,
        };
        peer::fsm(&mut top, &mut self.peers, &peer_id, Event::Start);
    }

    pub fn process_msg(&mut self, msg: Message) {
        match msg {
            Message::Event(peer_id, event) => {
                let mut top = DlepTop {
                    config: &self.config,
                    protocfg: &self.protocfg,
                    info_base: &mut self.info_base,
                    client_tx: &self.client_tx,
                };
                peer::fsm(&mut top, &mut self.peers, &peer_id, event);
            }
            Message::Accept(stream, sockaddr) => self.make_peer(stream, sockaddr),
            Message::Connect(stream, sockaddr) => self.make_peer(stream, sockaddr),
            Message::ConnectFail(addr) => {
                dlep_error!("session connect to {} failed", addr);
            }
            Message::Client(command) => self.process_client_command(command),
        }
    }

    fn process_client_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::DestinationUp { mac, data_items } => {
                self.client_destination_up(mac, data_items)
            }
            ClientCommand::DestinationUpdate { mac, data_items } => {
                self.client_destination_update(mac, data_items)
            }
            ClientCommand::DestinationDown { mac } => self.client_destination_down(mac),
            ClientCommand::PeerUpdate { data_items } => self.client_peer_update(data_items),
            ClientCommand::LinkCharacteristicsRequest {
                peer_id,
                mac,
                data_items,
            } => self.client_link_characteristics_request(peer_id, mac, data_items),
        }
    }

    /// Bring up a locally-owned destination and announce it to every
    /// in-session peer.
    fn client_destination_up(&mut self, mac: DlepMac, data_items: Vec<DataItem>) {
        if let Err(err) = self
            .info_base
            .validate_ip_data_items(&data_items, &[], &self.protocfg)
        {
            dlep_error!("destination up {}: {}", mac, err);
            return;
        }
        if !self
            .info_base
            .local_mut()
            .add_destination(mac, &data_items, &self.protocfg)
        {
            return;
        }
        let items = self
            .info_base
            .local()
            .destination(mac)
            .map(|dd| dd.all_data_items())
            .unwrap_or_default();

        for peer in self.peers.values_mut() {
            if !peer.state.is_in_session() || peer.is_not_interested(&mac) {
                continue;
            }
            let mut pm = ProtocolMessage::for_signal(&self.protocfg, strings::DESTINATION_UP);
            pm.add_mac(&self.protocfg, mac);
            pm.add_data_items(items.clone());
            peer.send_message_expecting_response(&self.protocfg, &pm);
        }
    }

    fn client_destination_update(&mut self, mac: DlepMac, data_items: Vec<DataItem>) {
        if !self.info_base.local().valid_destination(mac) {
            dlep_error!("destination update {}: unknown destination", mac);
            return;
        }
        let existing: Vec<DataItem> = self
            .info_base
            .local()
            .destination(mac)
            .map(|dd| dd.ip_data_items().to_vec())
            .unwrap_or_default();
        if let Err(err) =
            self.info_base
                .validate_ip_data_items(&data_items, &existing, &self.protocfg)
        {
            dlep_error!("destination update {}: {}", mac, err);
            return;
        }
        self.info_base
            .local_mut()
            .update_destination(mac, &data_items, &self.protocfg);

        for peer in self.peers.values_mut() {
            if !peer.state.is_in_session() || peer.is_not_interested(&mac) {
                continue;
            }
            let mut pm = ProtocolMessage::for_signal(&self.protocfg, strings::DESTINATION_UPDATE);
            pm.add_mac(&self.protocfg, mac);
            pm.add_data_items(data_items.clone());
            peer.send_message(&self.protocfg, &pm);
        }
    }

    fn client_destination_down(&mut self, mac: DlepMac) {
        if !self.info_base.local_mut().remove_destination(mac) {
            return;
        }
        for peer in self.peers.values_mut() {
            if !peer.state.is_in_session() || peer.is_not_interested(&mac) {
                continue;
            }
            let mut pm = ProtocolMessage::for_signal(&self.protocfg, strings::DESTINATION_DOWN);
            pm.add_mac(&self.protocfg, mac);
            peer.send_message_expecting_response(&self.protocfg, &pm);
        }
    }

    fn client_peer_update(&mut self, data_items: Vec<DataItem>) {
        let existing = self.info_base.local().ip_data_items().to_vec();
        if let Err(err) =
            self.info_base
                .validate_ip_data_items(&data_items, &existing, &self.protocfg)
        {
            dlep_error!("peer update: {}", err);
            return;
        }
        let status = self
            .info_base
            .local_mut()
            .update_data_items(&data_items, &self.protocfg);
        if status != strings::SUCCESS {
            dlep_error!("peer update rejected: {}", status);
            return;
        }
        for peer in self.peers.values_mut() {
            if !peer.state.is_in_session() {
                continue;
            }
            let mut pm = ProtocolMessage::for_signal(&self.protocfg, strings::SESSION_UPDATE);
            pm.add_data_items(data_items.clone());
            peer.send_message_expecting_response(&self.protocfg, &pm);
        }
    }

    fn client_link_characteristics_request(
        &mut self,
        peer_id: String,
        mac: DlepMac,
        data_items: Vec<DataItem>,
    ) {
        let Some(peer) = self.peers.get_mut(&peer_id) else {
            dlep_error!("link characteristics request: peer={} not found", peer_id);
            return;
        };
        if !peer.state.is_in_session() {
            dlep_error!("link characteristics request: peer={} not in session", peer_id);
            return;
        }
        let mut pm =
            ProtocolMessage::for_signal(&self.protocfg, strings::LINK_CHARACTERISTICS_REQUEST);
        pm.add_mac(&self.protocfg, mac);
        pm.add_data_items(data_items);
        peer.send_message_expecting_response(&self.protocfg, &pm);
    }

    pub async fn event_loop(&mut self) {
        if let Err(err) = self.listen().await {
            dlep_error!("listen failed: {}", err);
            self.listen_err = Some(err);
        }
        self.start_connect();
        while let Some(msg) = self.rx.recv().await {
            self.process_msg(msg);
        }
    }
}

pub fn serve(mut dlep: Dlep) {
    tokio::spawn(async move {
        dlep.event_loop().await;
    });
}
