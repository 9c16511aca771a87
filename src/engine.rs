// Session engine: single owner of the pairing session and the call
// Every input produces an ordered list of effects for the runtime to carry out

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::IceConfig;
use crate::error::{MediaError, SessionError};
use crate::media::LocalMedia;
use crate::negotiation::{CallOutput, CallStatus, NegotiationEngine, PeerFactory};
use crate::protocol::Envelope;
use crate::session::{ChatMessage, Command, Output, PairingSession, Prompt, SessionProfile, Stage};
use crate::signaling::ChannelEvent;

#[derive(Debug)]
pub enum Input {
    Command(Command),
    Channel { generation: u64, event: ChannelEvent },
    TypingQuiesced { token: u64 },
    MediaAcquired(Result<LocalMedia, MediaError>),
    /// Periodic pump for the peer connection
    Tick(Instant),
    Shutdown,
}

#[derive(Debug)]
pub enum Effect {
    OpenChannel { generation: u64, url: String },
    Send(Envelope),
    CloseChannel { generation: u64 },
    ScheduleNotTyping { token: u64, after: Duration },
    AcquireMedia,
    Prompt(Prompt),
    /// Surface to the user; the session keeps running
    Report(SessionError),
}

/// Read-state snapshot handed to the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub stage: Stage,
    pub identity: Option<String>,
    pub partner_name: String,
    pub partner_connected: bool,
    pub partner_left: bool,
    pub waiting_for_partner: bool,
    pub matched_interest: Option<String>,
    pub conversation: Vec<ChatMessage>,
    pub partner_typing: bool,
    pub pending_image_request: bool,
    /// `None` in text-only mode
    pub call_status: Option<CallStatus>,
}

pub struct SessionEngine<F: PeerFactory> {
    session: PairingSession,
    negotiation: NegotiationEngine<F>,
    effects: VecDeque<Effect>,
    shut_down: bool,
}

impl<F: PeerFactory> SessionEngine<F> {
    pub fn new(profile: SessionProfile, factory: F, ice: IceConfig) -> Self {
        Self {
            session: PairingSession::new(profile),
            negotiation: NegotiationEngine::new(factory, ice),
            effects: VecDeque::new(),
            shut_down: false,
        }
    }

    pub fn handle(&mut self, input: Input) {
        if self.shut_down {
            debug!("Engine shut down, ignoring {:?}", input);
            return;
        }

        match input {
            Input::Command(command) => self.session.handle_command(command),
            Input::Channel { generation, event } => {
                self.session.handle_channel_event(generation, event)
            }
            Input::TypingQuiesced { token } => self.session.handle_typing_quiesced(token),
            Input::MediaAcquired(result) => self.negotiation.media_acquired(result),
            Input::Tick(now) => self.negotiation.drive(now),
            Input::Shutdown => {
                // Media and peer first, then the channel
                self.negotiation.shutdown();
                self.session.shutdown();
                self.shut_down = true;
            }
        }

        self.pump();
    }

    pub fn poll_effect(&mut self) -> Option<Effect> {
        self.effects.pop_front()
    }

    /// A peer connection exists and wants regular ticks
    pub fn needs_tick(&self) -> bool {
        self.negotiation.has_call()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn session(&self) -> &PairingSession {
        &self.session
    }

    pub fn view(&self) -> SessionView {
        let session = &self.session;
        SessionView {
            stage: session.stage(),
            identity: session.identity().map(str::to_string),
            partner_name: session.partner_name().to_string(),
            partner_connected: session.is_partner_connected(),
            partner_left: session.partner_left(),
            waiting_for_partner: session.waiting_for_partner(),
            matched_interest: session.matched_interest().map(str::to_string),
            conversation: session.conversation().entries().to_vec(),
            partner_typing: session.is_partner_typing(),
            pending_image_request: session.pending_image_request(),
            call_status: session
                .is_video()
                .then(|| self.negotiation.status().clone()),
        }
    }

    /// Move session outputs and call outputs into the effect queue, in order
    fn pump(&mut self) {
        self.drain_negotiation();
        while let Some(output) = self.session.poll_output() {
            match output {
                Output::Call(signal) => {
                    self.negotiation.handle_signal(signal);
                    self.drain_negotiation();
                }
                Output::OpenChannel { generation, url } => {
                    self.effects.push_back(Effect::OpenChannel { generation, url })
                }
                Output::Send(envelope) => self.effects.push_back(Effect::Send(envelope)),
                Output::CloseChannel { generation } => {
                    self.effects.push_back(Effect::CloseChannel { generation })
                }
                Output::ScheduleNotTyping { token, after } => {
                    self.effects.push_back(Effect::ScheduleNotTyping { token, after })
                }
                Output::Prompt(prompt) => self.effects.push_back(Effect::Prompt(prompt)),
                Output::ConnectionLost(e) => self.effects.push_back(Effect::Report(e.into())),
            }
        }
    }

    fn drain_negotiation(&mut self) {
        while let Some(output) = self.negotiation.poll_output() {
            self.effects.push_back(match output {
                CallOutput::AcquireMedia => Effect::AcquireMedia,
                CallOutput::Send(envelope) => Effect::Send(envelope),
                CallOutput::Error(e) => Effect::Report(e),
            });
        }
    }
}
