// Negotiation engine: offer/answer and trickle ICE for one call at a time
// Sans-I/O like the session; the runtime drains `poll_output` and feeds `drive` ticks

use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::peer::{PeerConnection, PeerFactory};
use super::role::{select_role, Role};
use super::state::{CallStatus, NegotiationState, PeerConnectionState};
use crate::config::IceConfig;
use crate::error::{MediaError, NegotiationError, SessionError};
use crate::media::LocalMedia;
use crate::protocol::{Envelope, IceCandidateInit, SessionDescription};
use crate::session::CallSignal;

#[derive(Debug)]
pub enum CallOutput {
    /// Local capture is needed before anything else can happen
    AcquireMedia,
    Send(Envelope),
    Error(SessionError),
}

enum MediaPhase {
    NotRequested,
    Acquiring,
    Ready(LocalMedia),
    Unavailable,
    Stopped,
}

struct ActiveCall<P> {
    state: NegotiationState,
    peer: P,
}

impl<P> ActiveCall<P> {
    fn failed(&self) -> bool {
        self.state.connection_state == PeerConnectionState::Failed
    }
}

pub struct NegotiationEngine<F: PeerFactory> {
    factory: F,
    ice: IceConfig,
    media: MediaPhase,
    call: Option<ActiveCall<F::Peer>>,
    /// Signals waiting for media or for the call to exist
    buffered: VecDeque<CallSignal>,
    status: CallStatus,
    outputs: VecDeque<CallOutput>,
}

impl<F: PeerFactory> NegotiationEngine<F> {
    pub fn new(factory: F, ice: IceConfig) -> Self {
        Self {
            factory,
            ice,
            media: MediaPhase::NotRequested,
            call: None,
            buffered: VecDeque::new(),
            status: CallStatus::Idle,
            outputs: VecDeque::new(),
        }
    }

    pub fn poll_output(&mut self) -> Option<CallOutput> {
        self.outputs.pop_front()
    }

    pub fn status(&self) -> &CallStatus {
        &self.status
    }

    pub fn state(&self) -> Option<&NegotiationState> {
        self.call.as_ref().map(|c| &c.state)
    }

    pub fn has_call(&self) -> bool {
        self.call.is_some()
    }

    pub fn local_media(&self) -> Option<&LocalMedia> {
        match &self.media {
            MediaPhase::Ready(media) => Some(media),
            _ => None,
        }
    }

    pub fn handle_signal(&mut self, signal: CallSignal) {
        if signal == CallSignal::End {
            self.end_call();
            return;
        }

        match self.media {
            MediaPhase::NotRequested => {
                self.buffered.push_back(signal);
                self.media = MediaPhase::Acquiring;
                self.status = CallStatus::AcquiringMedia;
                self.outputs.push_back(CallOutput::AcquireMedia);
            }
            MediaPhase::Acquiring => self.buffered.push_back(signal),
            MediaPhase::Unavailable | MediaPhase::Stopped => {
                debug!("No local media, ignoring call signal");
            }
            MediaPhase::Ready(_) => self.process(signal),
        }
    }

    /// Result of the capture request issued with `AcquireMedia`
    pub fn media_acquired(&mut self, result: Result<LocalMedia, MediaError>) {
        if !matches!(self.media, MediaPhase::Acquiring) {
            if let Ok(media) = result {
                debug!("Releasing media that arrived after it stopped being needed");
                media.stop();
            }
            return;
        }

        match result {
            Ok(media) => {
                info!("Local media ready ({} tracks)", media.tracks.len());
                self.media = MediaPhase::Ready(media);
                if self.status == CallStatus::AcquiringMedia {
                    self.status = CallStatus::Idle;
                }
                let pending: Vec<_> = self.buffered.drain(..).collect();
                for signal in pending {
                    self.process(signal);
                }
            }
            Err(e) => {
                warn!("Local media unavailable, continuing with chat only: {}", e);
                self.media = MediaPhase::Unavailable;
                self.buffered.clear();
                self.status = CallStatus::MediaUnavailable(e.to_string());
                self.outputs.push_back(CallOutput::Error(e.into()));
            }
        }
    }

    /// Pump the peer connection and forward gathered candidates
    pub fn drive(&mut self, now: Instant) {
        let Some(call) = self.call.as_mut() else {
            return;
        };
        if call.failed() {
            return;
        }

        if let Err(e) = call.peer.drive(now) {
            self.degrade(e);
            return;
        }

        while let Some(candidate) = call.peer.poll_local_candidate() {
            if call.state.has_local_description() {
                self.outputs.push_back(CallOutput::Send(Envelope::IceCandidate {
                    candidate,
                    sender: call.state.local_id.clone(),
                }));
            } else {
                call.state.pending_local_candidates.push(candidate);
            }
        }

        let state = call.peer.state();
        if state == call.state.connection_state {
            return;
        }
        debug!("Peer connection {:?} -> {:?}", call.state.connection_state, state);
        call.state.connection_state = state;

        match state {
            PeerConnectionState::Connected => {
                info!("Media connection established with {}", call.state.partner_id);
                self.status = CallStatus::Connected;
            }
            PeerConnectionState::Failed => {
                self.degrade(NegotiationError::Ice("connection failed".to_string()));
            }
            PeerConnectionState::Disconnected => warn!("Media connection interrupted"),
            _ => {}
        }
    }

    /// Whole session is ending: release capture, then drop the call
    ///
    /// Tracks are stopped before the peer is closed so nothing is still
    /// being sent on a connection that is going away.
    pub fn shutdown(&mut self) {
        if let MediaPhase::Ready(media) = &self.media {
            media.stop();
            info!("Local media stopped");
        }
        self.media = MediaPhase::Stopped;
        self.end_call();
    }

    fn process(&mut self, signal: CallSignal) {
        match signal {
            CallSignal::PartnerReady {
                local_id,
                partner_id,
            } => self.start_call(local_id, partner_id),
            CallSignal::Offer { offer, sender } => self.on_offer(offer, sender),
            CallSignal::Answer { answer, sender } => self.on_answer(answer, sender),
            CallSignal::RemoteCandidate { candidate, sender } => {
                self.on_remote_candidate(candidate, sender)
            }
            CallSignal::End => self.end_call(),
        }
    }

    fn start_call(&mut self, local_id: String, partner_id: String) {
        if self.call.is_some() {
            self.close_call();
        }

        let role = select_role(&local_id, &partner_id);
        let peer = match self.factory.create(&self.ice) {
            Ok(peer) => peer,
            Err(e) => {
                self.degrade(e);
                return;
            }
        };

        info!("Starting call with {} as {:?}", partner_id, role);
        self.call = Some(ActiveCall {
            state: NegotiationState::new(role, local_id, partner_id),
            peer,
        });
        self.status = CallStatus::Negotiating;

        if role == Role::Initiator {
            self.send_offer();
        }

        // Signals that raced ahead of the call
        let early: Vec<_> = self.buffered.drain(..).collect();
        for signal in early {
            self.process(signal);
        }
    }

    fn send_offer(&mut self) {
        let (Some(call), MediaPhase::Ready(media)) = (self.call.as_mut(), &self.media) else {
            return;
        };

        match call.peer.create_offer(media) {
            Ok(offer) => {
                call.state.local_description = Some(offer.clone());
                self.outputs.push_back(CallOutput::Send(Envelope::Offer {
                    offer,
                    sender: call.state.local_id.clone(),
                }));
                self.flush_local_candidates();
            }
            Err(e) => self.degrade(e),
        }
    }

    fn on_offer(&mut self, offer: SessionDescription, sender: String) {
        let Some(call) = self.call.as_mut() else {
            self.buffered.push_back(CallSignal::Offer { offer, sender });
            return;
        };
        if sender == call.state.local_id || call.failed() {
            return;
        }
        if call.state.role == Role::Initiator {
            warn!("Ignoring offer from {}: we are the initiator", sender);
            return;
        }
        if call.state.has_remote_description() {
            debug!("Ignoring repeated offer");
            return;
        }
        let MediaPhase::Ready(media) = &self.media else {
            return;
        };

        match call.peer.create_answer(&offer, media) {
            Ok(answer) => {
                call.state.remote_description = Some(offer);
                call.state.local_description = Some(answer.clone());
                self.outputs.push_back(CallOutput::Send(Envelope::Answer {
                    answer,
                    sender: call.state.local_id.clone(),
                }));
                self.flush_local_candidates();
                self.flush_remote_candidates();
            }
            Err(e) => self.degrade(e),
        }
    }

    fn on_answer(&mut self, answer: SessionDescription, sender: String) {
        let Some(call) = self.call.as_mut() else {
            debug!("Ignoring answer without a call");
            return;
        };
        if sender == call.state.local_id || call.failed() {
            return;
        }
        if call.state.role != Role::Initiator
            || !call.state.has_local_description()
            || call.state.has_remote_description()
        {
            warn!("Ignoring unexpected answer from {}", sender);
            return;
        }

        match call.peer.set_remote_answer(&answer) {
            Ok(()) => {
                call.state.remote_description = Some(answer);
                self.flush_remote_candidates();
            }
            Err(e) => self.degrade(e),
        }
    }

    fn on_remote_candidate(&mut self, candidate: IceCandidateInit, sender: String) {
        if candidate.is_end_of_candidates() {
            debug!("Remote end of candidates");
            return;
        }
        let Some(call) = self.call.as_mut() else {
            self.buffered
                .push_back(CallSignal::RemoteCandidate { candidate, sender });
            return;
        };
        if sender == call.state.local_id || call.failed() {
            return;
        }

        if !call.state.has_remote_description() {
            debug!("Queueing remote candidate until the remote description is set");
            call.state.pending_remote_candidates.push_back(candidate);
            return;
        }

        if let Err(e) = call.peer.add_remote_candidate(&candidate) {
            warn!("Rejected remote candidate: {}", e);
            self.outputs.push_back(CallOutput::Error(e.into()));
        }
    }

    fn flush_local_candidates(&mut self) {
        let Some(call) = self.call.as_mut() else {
            return;
        };
        if !call.state.has_local_description() {
            return;
        }
        for candidate in call.state.pending_local_candidates.drain(..) {
            self.outputs.push_back(CallOutput::Send(Envelope::IceCandidate {
                candidate,
                sender: call.state.local_id.clone(),
            }));
        }
    }

    fn flush_remote_candidates(&mut self) {
        let Some(call) = self.call.as_mut() else {
            return;
        };
        while let Some(candidate) = call.state.pending_remote_candidates.pop_front() {
            if let Err(e) = call.peer.add_remote_candidate(&candidate) {
                warn!("Rejected queued remote candidate: {}", e);
                self.outputs.push_back(CallOutput::Error(e.into()));
            }
        }
    }

    /// Leave the call non-functional without touching the pairing
    fn degrade(&mut self, error: NegotiationError) {
        warn!("Call degraded: {}", error);
        if let Some(call) = self.call.as_mut() {
            call.peer.close();
            call.state.connection_state = PeerConnectionState::Failed;
        }
        self.status = CallStatus::Degraded(error.to_string());
        self.outputs.push_back(CallOutput::Error(error.into()));
    }

    fn close_call(&mut self) {
        if let Some(mut call) = self.call.take() {
            info!("Closing call with {}", call.state.partner_id);
            call.peer.close();
        }
    }

    fn end_call(&mut self) {
        self.buffered.clear();
        self.close_call();
        if !matches!(self.status, CallStatus::MediaUnavailable(_)) {
            self.status = CallStatus::Idle;
        }
    }
}
