use std::cmp::min;

use dlep_packet::ProtocolConfig;

use crate::context::Timer;

use super::Message;
use super::config::DlepConfig;
use super::peer::{Event, Peer, PeerState};

macro_rules! start_timer {
    ($peer:expr, $time:expr, $ev:expr) => {{
        let peer_id = $peer.peer_id.clone();
        let tx = $peer.tx.clone();

        Timer::once($time, move || {
            let tx = tx.clone();
            let peer_id = peer_id.clone();
            async move {
                let _ = tx.send(Message::Event(peer_id, $ev)).await;
            }
        })
    }};
}

macro_rules! start_repeater {
    ($peer:expr, $time:expr, $ev:expr) => {{
        let peer_id = $peer.peer_id.clone();
        let tx = $peer.tx.clone();

        Timer::repeat($time, move || {
            let tx = tx.clone();
            let peer_id = peer_id.clone();
            async move {
                let _ = tx.send(Message::Event(peer_id, $ev)).await;
            }
        })
    }};
}

fn start_heartbeat_timer(peer: &Peer, secs: u64) -> Timer {
    start_repeater!(peer, secs, Event::HeartbeatTimerExpires)
}

fn start_acktivity_timer(peer: &Peer, secs: u64) -> Timer {
    start_repeater!(peer, secs, Event::AcktivityTimerExpires)
}

fn start_termination_timer(peer: &Peer, secs: u64) -> Timer {
    start_timer!(peer, secs, Event::TerminationTimerExpires)
}

/// The acktivity timer drives both the retransmission sweep and the liveness
/// check, so it runs at the finer of the two cadences.  Never below one
/// second.
pub fn acktivity_interval(config: &DlepConfig, peer_heartbeat_secs: u32) -> u64 {
    let retry = config.retry_interval_seconds.max(1);
    if peer_heartbeat_secs == 0 {
        retry
    } else {
        min(peer_heartbeat_secs as u64, retry).max(1)
    }
}

/// Arm and cancel the peer's timers according to its state.
pub fn update_timers(config: &DlepConfig, protocfg: &ProtocolConfig, peer: &mut Peer) {
    use PeerState::*;
    match peer.state {
        Nonexistent => {}
        Connected => {
            peer.timer.heartbeat = None;
            if peer.timer.acktivity.is_none() {
                peer.timer.acktivity =
                    Some(start_acktivity_timer(peer, acktivity_interval(config, 0)));
            }
            peer.timer.termination = None;
        }
        InSession => {
            let heartbeat_secs =
                protocfg.heartbeat_interval_secs(config.heartbeat_interval) as u64;
            if peer.timer.heartbeat.is_none() && heartbeat_secs > 0 {
                peer.timer.heartbeat = Some(start_heartbeat_timer(peer, heartbeat_secs));
            }
            // Re-arm at the negotiated cadence now that the peer's heartbeat
            // interval is known.
            peer.timer.acktivity = Some(start_acktivity_timer(
                peer,
                acktivity_interval(config, peer.peer_heartbeat_secs),
            ));
            peer.timer.termination = None;
        }
        Terminating => {
            peer.timer.heartbeat = None;
            peer.timer.acktivity = None;
            if peer.timer.termination.is_none() {
                peer.timer.termination = Some(start_termination_timer(
                    peer,
                    config.retry_interval_seconds.max(1),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acktivity_cadence() {
        let mut config = DlepConfig::default();
        config.retry_interval_seconds = 3;
        // Handshake phase: peer heartbeat unknown.
        assert_eq!(acktivity_interval(&config, 0), 3);
        // Peer heartbeat finer than the retry interval.
        assert_eq!(acktivity_interval(&config, 2), 2);
        // Retry interval finer than the peer heartbeat.
        assert_eq!(acktivity_interval(&config, 10), 3);

        config.retry_interval_seconds = 0;
        assert_eq!(acktivity_interval(&config, 0), 1);
    }
}
