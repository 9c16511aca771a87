// str0m-backed peer connection
// Sans-I/O WebRTC over one UDP socket; `drive` does the socket and timer work

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

use str0m::change::{SdpAnswer, SdpOffer, SdpPendingOffer};
use str0m::media::{Direction, MediaKind};
use str0m::net::{Protocol, Receive};
use str0m::{Candidate, Event, IceConnectionState, Input, Output, Rtc};

use super::discovery::{discover_local_ip, query_stun, stun_server, turn_servers};
use super::peer::{PeerConnection, PeerFactory};
use super::state::PeerConnectionState;
use crate::config::IceConfig;
use crate::error::NegotiationError;
use crate::media::{LocalMedia, TrackKind};
use crate::protocol::{IceCandidateInit, SessionDescription};

const RECV_BUFFER: usize = 2000;

pub struct Str0mPeerFactory;

impl PeerFactory for Str0mPeerFactory {
    type Peer = Str0mPeer;

    fn create(&self, ice: &IceConfig) -> Result<Str0mPeer, NegotiationError> {
        Str0mPeer::new(ice)
    }
}

pub struct Str0mPeer {
    rtc: Rtc,
    socket: UdpSocket,
    host_addr: SocketAddr,
    pending_offer: Option<SdpPendingOffer>,
    gathered: VecDeque<IceCandidateInit>,
    /// Server-reflexive lookup running on its own thread
    srflx: Option<Receiver<Result<SocketAddr, NegotiationError>>>,
    deadline: Option<Instant>,
    state: PeerConnectionState,
    buf: Vec<u8>,
}

impl Str0mPeer {
    pub fn new(ice: &IceConfig) -> Result<Self, NegotiationError> {
        let local_ip = discover_local_ip().unwrap_or_else(|| {
            warn!("No usable interface found, binding media socket to loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        });

        // Bind to the chosen address, not 0.0.0.0, so local_addr matches the host candidate
        let socket = UdpSocket::bind(SocketAddr::new(local_ip, 0))
            .map_err(|e| NegotiationError::Transport(e.to_string()))?;
        let host_addr = socket
            .local_addr()
            .map_err(|e| NegotiationError::Transport(e.to_string()))?;
        info!("Media socket bound to {}", host_addr);

        let mut peer = Self {
            rtc: Rtc::builder().build(),
            socket,
            host_addr,
            pending_offer: None,
            gathered: VecDeque::new(),
            srflx: None,
            deadline: None,
            state: PeerConnectionState::New,
            buf: vec![0u8; RECV_BUFFER],
        };

        let host = Candidate::host(host_addr, "udp")
            .map_err(|e| NegotiationError::Ice(e.to_string()))?;
        peer.add_local(host);

        for turn in turn_servers(ice) {
            debug!("TURN server {} is not used by this transport", turn);
        }

        match stun_server(ice) {
            Some(server) => peer.start_stun(server)?,
            None => peer.finish_gathering()?,
        }

        Ok(peer)
    }

    fn add_local(&mut self, candidate: Candidate) {
        let sdp = candidate.to_sdp_string();
        let line = sdp.strip_prefix("a=").unwrap_or(&sdp).to_string();
        if self.rtc.add_local_candidate(candidate).is_some() {
            debug!("Local candidate {}", line);
            let mut init = IceCandidateInit::new(line);
            init.sdp_m_line_index = Some(0);
            self.gathered.push_back(init);
        }
    }

    /// Query STUN on a clone of the media socket so the NAT mapping is the one ICE uses
    fn start_stun(&mut self, server: String) -> Result<(), NegotiationError> {
        let socket = self
            .socket
            .try_clone()
            .map_err(|e| NegotiationError::Transport(e.to_string()))?;
        // Blocking with a read timeout until the lookup ends
        self.socket
            .set_nonblocking(false)
            .map_err(|e| NegotiationError::Transport(e.to_string()))?;

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(query_stun(&socket, &server));
        });
        self.srflx = Some(rx);
        Ok(())
    }

    fn poll_stun(&mut self) -> Result<(), NegotiationError> {
        let Some(rx) = &self.srflx else {
            return Ok(());
        };

        let result = match rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return Ok(()),
            Err(TryRecvError::Disconnected) => {
                Err(NegotiationError::Ice("stun lookup ended without a result".to_string()))
            }
        };

        match result {
            Ok(public) => match Candidate::server_reflexive(public, self.host_addr, "udp") {
                Ok(candidate) => self.add_local(candidate),
                Err(e) => warn!("Failed to create server reflexive candidate: {}", e),
            },
            Err(e) => warn!("STUN failed, using host candidate only: {}", e),
        }
        self.finish_gathering()
    }

    fn finish_gathering(&mut self) -> Result<(), NegotiationError> {
        self.srflx = None;
        self.socket
            .set_nonblocking(true)
            .map_err(|e| NegotiationError::Transport(e.to_string()))
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Connected => {
                info!("Peer connection established (ICE + DTLS)");
                self.state = PeerConnectionState::Connected;
            }
            Event::IceConnectionStateChange(ice_state) => {
                debug!("ICE state: {:?}", ice_state);
                match ice_state {
                    IceConnectionState::Checking => {
                        if self.state == PeerConnectionState::New {
                            self.state = PeerConnectionState::Connecting;
                        }
                    }
                    IceConnectionState::Disconnected => {
                        self.state = PeerConnectionState::Disconnected;
                    }
                    _ => {}
                }
            }
            Event::MediaAdded(added) => debug!("Remote media added: {:?}", added.mid),
            _ => {}
        }
    }

    fn receive_packets(&mut self, now: Instant) -> Result<(), NegotiationError> {
        loop {
            match self.socket.recv_from(&mut self.buf) {
                Ok((n, source)) => {
                    let contents = self.buf[..n]
                        .try_into()
                        .map_err(|e| NegotiationError::Transport(format!("{:?}", e)))?;
                    let receive = Receive {
                        proto: Protocol::Udp,
                        source,
                        destination: self.host_addr,
                        contents,
                    };
                    self.rtc
                        .handle_input(Input::Receive(now, receive))
                        .map_err(|e| NegotiationError::Transport(e.to_string()))?;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    return Ok(());
                }
                Err(e) => return Err(NegotiationError::Transport(e.to_string())),
            }
        }
    }
}

impl PeerConnection for Str0mPeer {
    fn create_offer(&mut self, media: &LocalMedia) -> Result<SessionDescription, NegotiationError> {
        let mut change = self.rtc.sdp_api();
        let mut tracks = 0;
        for track in media.live_tracks() {
            let kind = match track.kind {
                TrackKind::Audio => MediaKind::Audio,
                TrackKind::Video => MediaKind::Video,
            };
            change.add_media(
                kind,
                Direction::SendRecv,
                Some(media.stream_id.clone()),
                Some(track.id.clone()),
                None,
            );
            tracks += 1;
        }
        if tracks == 0 {
            change.add_channel("chat".to_string());
        }

        let (offer, pending) = change
            .apply()
            .ok_or_else(|| NegotiationError::Sdp("nothing to negotiate".to_string()))?;
        self.pending_offer = Some(pending);
        self.state = PeerConnectionState::Connecting;
        Ok(SessionDescription::offer(offer.to_sdp_string()))
    }

    fn create_answer(
        &mut self,
        offer: &SessionDescription,
        _media: &LocalMedia,
    ) -> Result<SessionDescription, NegotiationError> {
        // Tracks follow the offer's m-lines; str0m answers each one sendrecv
        let offer = SdpOffer::from_sdp_string(&offer.sdp)
            .map_err(|e| NegotiationError::Sdp(e.to_string()))?;
        let answer = self
            .rtc
            .sdp_api()
            .accept_offer(offer)
            .map_err(|e| NegotiationError::Sdp(e.to_string()))?;
        self.state = PeerConnectionState::Connecting;
        Ok(SessionDescription::answer(answer.to_sdp_string()))
    }

    fn set_remote_answer(&mut self, answer: &SessionDescription) -> Result<(), NegotiationError> {
        let pending = self
            .pending_offer
            .take()
            .ok_or_else(|| NegotiationError::Sdp("no offer awaiting an answer".to_string()))?;
        let answer = SdpAnswer::from_sdp_string(&answer.sdp)
            .map_err(|e| NegotiationError::Sdp(e.to_string()))?;
        self.rtc
            .sdp_api()
            .accept_answer(pending, answer)
            .map_err(|e| NegotiationError::Sdp(e.to_string()))
    }

    fn add_remote_candidate(&mut self, candidate: &IceCandidateInit) -> Result<(), NegotiationError> {
        let line = candidate.candidate.trim();
        let line = line.strip_prefix("a=").unwrap_or(line);
        let parsed = Candidate::from_sdp_string(line)
            .map_err(|e| NegotiationError::Ice(e.to_string()))?;
        self.rtc.add_remote_candidate(parsed);
        Ok(())
    }

    fn poll_local_candidate(&mut self) -> Option<IceCandidateInit> {
        self.gathered.pop_front()
    }

    fn drive(&mut self, now: Instant) -> Result<(), NegotiationError> {
        if self.state == PeerConnectionState::Closed {
            return Ok(());
        }

        self.poll_stun()?;

        // The STUN thread owns the socket's reads until it finishes
        if self.srflx.is_none() {
            self.receive_packets(now)?;
        }

        if self.deadline.map_or(true, |deadline| now >= deadline) {
            self.rtc
                .handle_input(Input::Timeout(now))
                .map_err(|e| NegotiationError::Transport(e.to_string()))?;
            self.deadline = None;
        }

        loop {
            let output = self
                .rtc
                .poll_output()
                .map_err(|e| NegotiationError::Transport(e.to_string()))?;
            match output {
                Output::Transmit(transmit) => {
                    if let Err(e) = self.socket.send_to(&transmit.contents, transmit.destination) {
                        warn!("Failed to send UDP packet to {}: {}", transmit.destination, e);
                    }
                }
                Output::Timeout(deadline) => {
                    self.deadline = Some(deadline);
                    break;
                }
                Output::Event(event) => self.handle_event(event),
            }
        }

        if !self.rtc.is_alive() && self.state != PeerConnectionState::Closed {
            self.state = PeerConnectionState::Failed;
        }
        Ok(())
    }

    fn state(&self) -> PeerConnectionState {
        self.state
    }

    fn close(&mut self) {
        if self.state == PeerConnectionState::Closed {
            return;
        }
        self.rtc.disconnect();
        self.srflx = None;
        self.state = PeerConnectionState::Closed;
        debug!("Peer connection on {} closed", self.host_addr);
    }
}
