use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::sync::mpsc::UnboundedSender;

use dlep_packet::{DlepMac, ProtocolConfig, ProtocolMessage, SignalIdType};

use crate::{dlep_debug, dlep_warn};

/// A request that has been handed to the transaction layer and is waiting
/// for its response.  The serialized bytes are kept for retransmission.
#[derive(Debug)]
pub struct ResponsePending {
    /// Signal id of the response we expect.
    pub response_id: SignalIdType,
    /// Name of that response, for logging.
    pub response_name: &'static str,
    /// Destination the response must carry.  Session-level transactions use
    /// the all-zero sentinel.
    pub destination: DlepMac,
    /// Has this request been parked behind an in-flight one?
    pub queued: bool,
    /// The complete serialized request.
    pub msg: BytesMut,
    /// When the request was last transmitted.
    pub send_time: Instant,
    /// Transmissions so far, counting the original send.
    pub send_tries: u32,
}

impl ResponsePending {
    /// `None` if the signal does not expect a response.
    pub fn new(protocfg: &ProtocolConfig, pm: &ProtocolMessage) -> Option<ResponsePending> {
        let info = protocfg.signal_info(pm.signal)?;
        let response_name = info.response?;
        Some(ResponsePending {
            response_id: protocfg.signal_id(response_name),
            response_name,
            destination: pm.mac(protocfg).unwrap_or(DlepMac::SESSION),
            queued: false,
            msg: pm.to_bytes(),
            send_time: Instant::now(),
            send_tries: 0,
        })
    }

    pub fn queue_name(&self) -> String {
        format!("{}/{}", self.destination, self.response_name)
    }
}

/// Outcome of matching an inbound response against the queue head.
#[derive(Debug, PartialEq, Eq)]
pub enum ResponseMatch {
    /// Head matched and was retired; the next request (if any) went out.
    Matched,
    /// A request is in flight for this MAC but expects a different response.
    Mismatch,
    /// Nothing is in flight for this MAC.
    NoneExpected,
}

/// Result of one retransmission sweep.
#[derive(Debug, Default)]
pub struct RetransmitSweep {
    pub retransmits: usize,
    /// Queue name of a request that exhausted its retry budget, if any.
    pub expired: Option<String>,
}

/// Per-peer transaction queues: one FIFO per destination MAC.  Only the head
/// of each queue is in flight; everything behind it waits its turn.
#[derive(Debug, Default)]
pub struct PendingQueues {
    queues: BTreeMap<DlepMac, VecDeque<ResponsePending>>,
}

fn transmit(rp: &mut ResponsePending, packet_tx: Option<&UnboundedSender<BytesMut>>) {
    if let Some(tx) = packet_tx {
        let _ = tx.send(rp.msg.clone());
    }
    rp.queued = false;
    rp.send_time = Instant::now();
    rp.send_tries += 1;
}

impl PendingQueues {
    /// Hand a request to the transaction layer.  It is transmitted now if it
    /// becomes the queue head, otherwise parked.  Returns whether it went
    /// out immediately.
    pub fn enqueue(
        &mut self,
        mut rp: ResponsePending,
        packet_tx: Option<&UnboundedSender<BytesMut>>,
    ) -> bool {
        let queue = self.queues.entry(rp.destination).or_default();
        if queue.is_empty() {
            transmit(&mut rp, packet_tx);
            queue.push_back(rp);
            true
        } else {
            dlep_debug!("queueing request behind {}", queue[0].queue_name());
            rp.queued = true;
            queue.push_back(rp);
            false
        }
    }

    /// Match an inbound response against the queue head for its MAC.  On a
    /// match the head is retired and the next queued request transmitted.
    pub fn handle_response(
        &mut self,
        response_id: SignalIdType,
        mac: DlepMac,
        packet_tx: Option<&UnboundedSender<BytesMut>>,
    ) -> ResponseMatch {
        let Some(queue) = self.queues.get_mut(&mac) else {
            return ResponseMatch::NoneExpected;
        };
        let Some(head) = queue.front() else {
            return ResponseMatch::NoneExpected;
        };
        if head.response_id != response_id {
            dlep_warn!(
                "response {} does not match pending {}",
                response_id,
                head.queue_name()
            );
            return ResponseMatch::Mismatch;
        }
        queue.pop_front();
        if let Some(next) = queue.front_mut() {
            transmit(next, packet_tx);
        } else {
            self.queues.remove(&mac);
        }
        ResponseMatch::Matched
    }

    /// Retransmit every overdue queue head; report a request whose retry
    /// budget is exhausted so the caller can terminate the peer.
    pub fn check_retransmits(
        &mut self,
        retry_interval: Duration,
        max_retries: u32,
        packet_tx: Option<&UnboundedSender<BytesMut>>,
    ) -> RetransmitSweep {
        let mut sweep = RetransmitSweep::default();
        for queue in self.queues.values_mut() {
            let Some(head) = queue.front_mut() else {
                continue;
            };
            if head.send_time.elapsed() < retry_interval {
                continue;
            }
            if head.send_tries < max_retries + 1 {
                dlep_debug!(
                    "retransmitting {} try {}",
                    head.queue_name(),
                    head.send_tries + 1
                );
                transmit(head, packet_tx);
                sweep.retransmits += 1;
            } else {
                sweep.expired = Some(head.queue_name());
                return sweep;
            }
        }
        sweep
    }

    pub fn front_mut(&mut self, mac: DlepMac) -> Option<&mut ResponsePending> {
        self.queues.get_mut(&mac).and_then(|q| q.front_mut())
    }

    pub fn clear(&mut self) {
        self.queues.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Total requests held, in flight or parked.
    pub fn len(&self) -> usize {
        self.queues.values().map(|q| q.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use dlep_packet::strings;
    use tokio::sync::mpsc::unbounded_channel;

    fn mac(last: u8) -> DlepMac {
        DlepMac::from([0xaa, 0xbb, 0xcc, 0, 0, last])
    }

    fn destination_up(protocfg: &ProtocolConfig, mac: DlepMac) -> ProtocolMessage {
        let mut pm = ProtocolMessage::for_signal(protocfg, strings::DESTINATION_UP);
        pm.add_mac(protocfg, mac);
        pm
    }

    #[test]
    fn single_in_flight_per_mac() {
        let cfg = ProtocolConfig::default_config();
        let (tx, mut rx) = unbounded_channel::<BytesMut>();
        let mut queues = PendingQueues::default();

        let first = ResponsePending::new(&cfg, &destination_up(&cfg, mac(1))).unwrap();
        let second = ResponsePending::new(&cfg, &destination_up(&cfg, mac(1))).unwrap();

        assert!(queues.enqueue(first, Some(&tx)));
        assert!(!queues.enqueue(second, Some(&tx)));
        assert_eq!(queues.len(), 2);
        // Only the head was transmitted.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        // The response retires the head and releases the parked request.
        let response_id = cfg.signal_id(strings::DESTINATION_UP_RESPONSE);
        assert_eq!(
            queues.handle_response(response_id, mac(1), Some(&tx)),
            ResponseMatch::Matched
        );
        assert!(rx.try_recv().is_ok());
        assert_eq!(queues.len(), 1);

        assert_eq!(
            queues.handle_response(response_id, mac(1), Some(&tx)),
            ResponseMatch::Matched
        );
        assert!(queues.is_empty());
    }

    #[test]
    fn independent_macs_fly_concurrently() {
        let cfg = ProtocolConfig::default_config();
        let (tx, mut rx) = unbounded_channel::<BytesMut>();
        let mut queues = PendingQueues::default();

        let a = ResponsePending::new(&cfg, &destination_up(&cfg, mac(1))).unwrap();
        let b = ResponsePending::new(&cfg, &destination_up(&cfg, mac(2))).unwrap();
        assert!(queues.enqueue(a, Some(&tx)));
        assert!(queues.enqueue(b, Some(&tx)));
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn mismatch_and_unexpected() {
        let cfg = ProtocolConfig::default_config();
        let (tx, _rx) = unbounded_channel::<BytesMut>();
        let mut queues = PendingQueues::default();

        let up_response = cfg.signal_id(strings::DESTINATION_UP_RESPONSE);
        assert_eq!(
            queues.handle_response(up_response, mac(1), Some(&tx)),
            ResponseMatch::NoneExpected
        );

        let rp = ResponsePending::new(&cfg, &destination_up(&cfg, mac(1))).unwrap();
        queues.enqueue(rp, Some(&tx));
        let down_response = cfg.signal_id(strings::DESTINATION_DOWN_RESPONSE);
        assert_eq!(
            queues.handle_response(down_response, mac(1), Some(&tx)),
            ResponseMatch::Mismatch
        );
    }

    #[test]
    fn retransmit_until_budget_exhausted() {
        let cfg = ProtocolConfig::default_config();
        let (tx, mut rx) = unbounded_channel::<BytesMut>();
        let mut queues = PendingQueues::default();

        let rp = ResponsePending::new(&cfg, &destination_up(&cfg, mac(1))).unwrap();
        queues.enqueue(rp, Some(&tx));
        assert!(rx.try_recv().is_ok());

        let interval = Duration::from_secs(1);
        let max_retries = 3;

        // Not yet overdue: nothing happens.
        let sweep = queues.check_retransmits(interval, max_retries, Some(&tx));
        assert_eq!(sweep.retransmits, 0);
        assert!(sweep.expired.is_none());

        // Each overdue sweep retransmits until the budget is gone.
        for try_number in 2..=max_retries + 1 {
            let head = queues.front_mut(mac(1)).unwrap();
            head.send_time = Instant::now() - Duration::from_secs(2);
            let sweep = queues.check_retransmits(interval, max_retries, Some(&tx));
            assert_eq!(sweep.retransmits, 1, "try {}", try_number);
            assert!(rx.try_recv().is_ok());
        }

        // Budget exhausted: the sweep reports expiry instead.
        let head = queues.front_mut(mac(1)).unwrap();
        assert_eq!(head.send_tries, max_retries + 1);
        head.send_time = Instant::now() - Duration::from_secs(2);
        let sweep = queues.check_retransmits(interval, max_retries, Some(&tx));
        assert_eq!(sweep.retransmits, 0);
        assert!(sweep.expired.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn session_level_requests_use_sentinel() {
        let cfg = ProtocolConfig::default_config();
        let (tx, _rx) = unbounded_channel::<BytesMut>();
        let mut queues = PendingQueues::default();

        let mut pm = ProtocolMessage::for_signal(&cfg, strings::SESSION_INITIALIZATION);
        pm.add_heartbeat_interval(&cfg, 1000);
        let rp = ResponsePending::new(&cfg, &pm).unwrap();
        assert_eq!(rp.destination, DlepMac::SESSION);
        queues.enqueue(rp, Some(&tx));

        let response_id = cfg.signal_id(strings::SESSION_INITIALIZATION_RESPONSE);
        assert_eq!(
            queues.handle_response(response_id, DlepMac::SESSION, Some(&tx)),
            ResponseMatch::Matched
        );
    }

    #[test]
    fn heartbeat_has_no_transaction() {
        let cfg = ProtocolConfig::default_config();
        let pm = ProtocolMessage::for_signal(&cfg, strings::HEARTBEAT);
        assert!(ResponsePending::new(&cfg, &pm).is_none());
    }
}
