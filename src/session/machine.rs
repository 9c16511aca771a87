// Pairing session state machine
// Sans-I/O: inputs go in through `handle_*`, effects come out of `poll_output`

use chrono::{SecondsFormat, Utc};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::conversation::{ChatMessage, Conversation};
use super::stage::Stage;
use crate::config::Config;
use crate::error::ConnectionError;
use crate::media::ImageAttachment;
use crate::protocol::{Envelope, IceCandidateInit, SessionDescription};
use crate::signaling::{ChannelEvent, Endpoint};

const DEFAULT_PARTNER_NAME: &str = "Stranger";

/// Everything the session needs to know about the local user and the server
#[derive(Debug, Clone)]
pub struct SessionProfile {
    pub endpoint: Endpoint,
    pub display_name: String,
    pub interests: Vec<String>,
    pub typing_quiescence: Duration,
    pub video: bool,
}

impl SessionProfile {
    pub fn from_config(config: &Config) -> Self {
        Self {
            endpoint: config.signaling.endpoint().clone(),
            display_name: config.identity.display_name.clone(),
            interests: config.identity.interests.clone(),
            typing_quiescence: config.chat.typing_quiescence(),
            video: config.chat.video,
        }
    }
}

/// User actions accepted by the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SendText(String),
    /// `None` when the user asked to send but picked no file
    SendImage(Option<ImageAttachment>),
    RequestImage,
    Keystroke,
    StopRequested,
    ConfirmDisconnect,
    StartNew,
}

/// Something the user has to act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    SelectImage,
}

/// Pairing events the call layer reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum CallSignal {
    /// Both ids are known; the call can be set up
    PartnerReady { local_id: String, partner_id: String },
    Offer { offer: SessionDescription, sender: String },
    Answer { answer: SessionDescription, sender: String },
    RemoteCandidate { candidate: IceCandidateInit, sender: String },
    /// The pairing is over
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    OpenChannel { generation: u64, url: String },
    Send(Envelope),
    CloseChannel { generation: u64 },
    ScheduleNotTyping { token: u64, after: Duration },
    Prompt(Prompt),
    Call(CallSignal),
    ConnectionLost(ConnectionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelPhase {
    Idle,
    Opening(u64),
    Open(u64),
}

impl ChannelPhase {
    fn generation(self) -> Option<u64> {
        match self {
            ChannelPhase::Idle => None,
            ChannelPhase::Opening(g) | ChannelPhase::Open(g) => Some(g),
        }
    }
}

pub struct PairingSession {
    profile: SessionProfile,
    stage: Stage,

    identity: Option<String>,
    identity_hint: Option<String>,
    partner_id: Option<String>,
    partner_name: String,
    partner_left: bool,
    matched_interest: Option<String>,

    conversation: Conversation,
    partner_typing: bool,
    pending_image_request: bool,

    channel: ChannelPhase,
    next_generation: u64,

    typing_token: u64,
    typing_armed: bool,

    /// Call signals have gone out for the current partner
    call_active: bool,
    /// `PartnerReady` has gone out for the current partner
    partner_ready_sent: bool,

    outputs: VecDeque<Output>,
}

impl PairingSession {
    pub fn new(profile: SessionProfile) -> Self {
        Self {
            profile,
            stage: Stage::Disconnected,
            identity: None,
            identity_hint: None,
            partner_id: None,
            partner_name: DEFAULT_PARTNER_NAME.to_string(),
            partner_left: false,
            matched_interest: None,
            conversation: Conversation::new(),
            partner_typing: false,
            pending_image_request: false,
            channel: ChannelPhase::Idle,
            next_generation: 0,
            typing_token: 0,
            typing_armed: false,
            call_active: false,
            partner_ready_sent: false,
            outputs: VecDeque::new(),
        }
    }

    pub fn poll_output(&mut self) -> Option<Output> {
        self.outputs.pop_front()
    }

    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartNew => self.start_new(),
            Command::StopRequested => {
                if self.stage == Stage::Active {
                    self.transition(Stage::ConfirmDisconnect);
                } else {
                    debug!("Stop ignored in {:?}", self.stage);
                }
            }
            Command::ConfirmDisconnect => {
                if self.stage == Stage::ConfirmDisconnect {
                    self.local_disconnect();
                } else {
                    debug!("Confirm ignored in {:?}", self.stage);
                }
            }
            Command::Keystroke => self.keystroke(),
            Command::SendText(text) => self.send_text(text),
            Command::SendImage(None) => self.outputs.push_back(Output::Prompt(Prompt::SelectImage)),
            Command::SendImage(Some(image)) => self.send_image(&image),
            Command::RequestImage => self.request_image(),
        }
    }

    /// Feed an event from the channel with the given generation
    pub fn handle_channel_event(&mut self, generation: u64, event: ChannelEvent) {
        if self.channel.generation() != Some(generation) {
            debug!("Ignoring event from stale channel #{}: {:?}", generation, event);
            return;
        }

        match event {
            ChannelEvent::Opened => {
                self.channel = ChannelPhase::Open(generation);
                self.send(Envelope::GetId);
            }
            ChannelEvent::Envelope(envelope) => self.handle_envelope(envelope),
            ChannelEvent::Malformed(e) => warn!("Discarding malformed envelope: {}", e),
            ChannelEvent::Closed(error) => {
                info!("Signaling channel #{} closed", generation);
                self.channel = ChannelPhase::Idle;
                if let Some(e) = error {
                    self.outputs.push_back(Output::ConnectionLost(e));
                }
                self.end_pairing();
            }
        }
    }

    /// The whole session is going away; tell the partner if there is one
    pub fn shutdown(&mut self) {
        self.end_call();
        if self.partner_id.is_some() {
            self.send(Envelope::Disconnect);
        }
        self.close_channel();
        self.end_pairing();
    }

    /// The `notTyping` timer armed with `token` expired
    pub fn handle_typing_quiesced(&mut self, token: u64) {
        if !self.typing_armed || token != self.typing_token {
            return;
        }
        self.typing_armed = false;
        self.send(Envelope::NotTyping);
    }

    // ---- read state ----

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn partner_id(&self) -> Option<&str> {
        self.partner_id.as_deref()
    }

    pub fn partner_name(&self) -> &str {
        &self.partner_name
    }

    pub fn is_partner_connected(&self) -> bool {
        self.partner_id.is_some()
    }

    /// The last partner went away during this cycle
    pub fn partner_left(&self) -> bool {
        self.partner_left
    }

    pub fn matched_interest(&self) -> Option<&str> {
        self.matched_interest.as_deref()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn is_partner_typing(&self) -> bool {
        self.partner_typing
    }

    pub fn pending_image_request(&self) -> bool {
        self.pending_image_request
    }

    pub fn connect_in_flight(&self) -> bool {
        matches!(self.channel, ChannelPhase::Opening(_))
    }

    /// Channel is up but the server has not paired us yet
    pub fn waiting_for_partner(&self) -> bool {
        matches!(self.channel, ChannelPhase::Open(_)) && self.partner_id.is_none()
    }

    pub fn is_video(&self) -> bool {
        self.profile.video
    }

    // ---- transitions ----

    fn transition(&mut self, next: Stage) {
        if self.stage == next {
            return;
        }
        if !self.stage.can_transition_to(next) {
            warn!("Refusing stage change {:?} -> {:?}", self.stage, next);
            return;
        }
        debug!("Stage {:?} -> {:?}", self.stage, next);
        self.stage = next;
    }

    fn start_new(&mut self) {
        if self.connect_in_flight() {
            debug!("New connection ignored: connect already in flight");
            return;
        }
        if self.stage != Stage::Disconnected {
            debug!("New connection ignored in {:?}", self.stage);
            return;
        }

        // Old cycle goes first
        self.end_call();
        if let Some(generation) = self.channel.generation() {
            self.outputs.push_back(Output::CloseChannel { generation });
        }
        self.channel = ChannelPhase::Idle;

        self.identity = None;
        self.partner_id = None;
        self.partner_name = DEFAULT_PARTNER_NAME.to_string();
        self.partner_left = false;
        self.matched_interest = None;
        self.conversation.clear();
        self.partner_typing = false;
        self.pending_image_request = false;
        self.typing_armed = false;

        let url = match self.profile.endpoint.connect_url(
            self.identity_hint.as_deref(),
            &self.profile.display_name,
            &self.profile.interests,
        ) {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot connect: {}", e);
                self.outputs.push_back(Output::ConnectionLost(e));
                return;
            }
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        info!("Opening signaling channel #{}", generation);
        self.outputs.push_back(Output::OpenChannel {
            generation,
            url: url.into(),
        });
        self.channel = ChannelPhase::Opening(generation);
        self.transition(Stage::Connecting);
    }

    fn handle_envelope(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Id { id } => {
                info!("Assigned identity {}", id);
                self.identity = Some(id.clone());
                self.identity_hint = Some(id);
                self.maybe_start_call();
            }
            Envelope::PartnerId {
                partner_id: Some(partner_id),
                matched_interest,
            } => self.partner_assigned(partner_id, matched_interest),
            Envelope::PartnerId { partner_id: None, .. } => {
                if self.partner_id.is_some() {
                    info!("Partner left");
                    self.partner_left = true;
                } else {
                    debug!("No partner yet");
                }
                self.end_pairing();
            }
            Envelope::PartnerName { name } => {
                if !name.trim().is_empty() {
                    self.partner_name = name;
                }
            }
            Envelope::Typing => self.partner_typing = true,
            Envelope::NotTyping => self.partner_typing = false,
            Envelope::Disconnect => self.remote_disconnect(),

            Envelope::Message {
                text,
                name,
                sender,
                timestamp,
            } if self.stage.is_chatting() => {
                self.conversation.push(ChatMessage::Text {
                    text,
                    sender,
                    display_name: name,
                    timestamp,
                });
                self.transition(Stage::Active);
            }
            Envelope::Image {
                image_data,
                name,
                sender,
                timestamp,
            } if self.stage.is_chatting() => {
                self.conversation.push(ChatMessage::Image {
                    image_data,
                    sender,
                    display_name: name,
                    timestamp,
                });
                self.transition(Stage::Active);
            }
            Envelope::ImageRequest {
                name,
                sender,
                timestamp,
            } if self.stage.is_chatting() => {
                self.pending_image_request = true;
                self.conversation.push(ChatMessage::ImageRequestReceived {
                    sender,
                    display_name: name,
                    timestamp,
                });
                self.transition(Stage::Active);
            }
            Envelope::Message { .. } | Envelope::Image { .. } | Envelope::ImageRequest { .. } => {
                debug!("Dropping {} outside a chat", envelope.kind());
            }

            Envelope::Offer { offer, sender } => {
                self.forward_call(CallSignal::Offer { offer, sender });
            }
            Envelope::Answer { answer, sender } => {
                self.forward_call(CallSignal::Answer { answer, sender });
            }
            Envelope::IceCandidate { candidate, sender } => {
                self.forward_call(CallSignal::RemoteCandidate { candidate, sender });
            }

            Envelope::GetId => debug!("Ignoring inbound getId"),
            Envelope::Unknown { kind, .. } => debug!("Ignoring unknown envelope type {}", kind),
        }
    }

    fn partner_assigned(&mut self, partner_id: String, matched_interest: Option<String>) {
        if self.partner_id.as_deref() == Some(partner_id.as_str()) && self.stage.is_chatting() {
            self.matched_interest = matched_interest;
            return;
        }

        // Re-pairing without an explicit loss in between
        if self.partner_id.is_some() {
            self.end_call();
        }

        info!("Paired with {}", partner_id);
        self.partner_id = Some(partner_id);
        self.partner_name = DEFAULT_PARTNER_NAME.to_string();
        self.partner_left = false;
        self.matched_interest = matched_interest;
        self.pending_image_request = false;
        self.partner_typing = false;

        self.send(Envelope::PartnerName {
            name: self.profile.display_name.clone(),
        });
        self.transition(Stage::Active);
        self.maybe_start_call();
    }

    fn remote_disconnect(&mut self) {
        if self.partner_id.is_none() && !self.stage.is_chatting() {
            debug!("Disconnect ignored: not paired");
            return;
        }
        info!("Partner disconnected");
        self.partner_left = true;
        self.end_call();
        self.close_channel();
        self.end_pairing();
    }

    fn local_disconnect(&mut self) {
        info!("Disconnecting");
        self.end_call();
        self.send(Envelope::Disconnect);
        self.close_channel();
        self.end_pairing();
    }

    /// Common tail of every way a pairing ends
    fn end_pairing(&mut self) {
        self.end_call();
        self.partner_id = None;
        self.matched_interest = None;
        self.partner_typing = false;
        self.pending_image_request = false;
        self.typing_armed = false;
        self.transition(Stage::Disconnected);
    }

    fn close_channel(&mut self) {
        if let Some(generation) = self.channel.generation() {
            self.outputs.push_back(Output::CloseChannel { generation });
        }
        self.channel = ChannelPhase::Idle;
    }

    // ---- call signals ----

    fn maybe_start_call(&mut self) {
        if !self.profile.video || self.partner_ready_sent || !self.stage.is_chatting() {
            return;
        }
        // Offers may already have been forwarded; the call still needs both ids
        if let (Some(local_id), Some(partner_id)) = (&self.identity, &self.partner_id) {
            self.call_active = true;
            self.partner_ready_sent = true;
            self.outputs.push_back(Output::Call(CallSignal::PartnerReady {
                local_id: local_id.clone(),
                partner_id: partner_id.clone(),
            }));
        }
    }

    fn forward_call(&mut self, signal: CallSignal) {
        if !self.profile.video {
            debug!("Ignoring call signal in text-only mode");
            return;
        }
        if self.partner_id.is_none() {
            debug!("Ignoring call signal without a partner");
            return;
        }
        self.call_active = true;
        self.outputs.push_back(Output::Call(signal));
    }

    fn end_call(&mut self) {
        self.partner_ready_sent = false;
        if self.call_active {
            self.call_active = false;
            self.outputs.push_back(Output::Call(CallSignal::End));
        }
    }

    // ---- local chat ----

    fn keystroke(&mut self) {
        if !self.stage.is_chatting() {
            return;
        }
        self.send(Envelope::Typing);
        self.typing_token += 1;
        self.typing_armed = true;
        self.outputs.push_back(Output::ScheduleNotTyping {
            token: self.typing_token,
            after: self.profile.typing_quiescence,
        });
    }

    fn send_text(&mut self, text: String) {
        if !self.stage.is_chatting() {
            debug!("Not sending text in {:?}", self.stage);
            return;
        }
        if text.trim().is_empty() {
            return;
        }

        self.typing_armed = false;
        self.send(Envelope::NotTyping);

        let sender = self.sender();
        let timestamp = now_timestamp();
        self.send(Envelope::Message {
            text: text.clone(),
            name: self.profile.display_name.clone(),
            sender: sender.clone(),
            timestamp: timestamp.clone(),
        });
        self.conversation.push(ChatMessage::Text {
            text,
            sender,
            display_name: self.profile.display_name.clone(),
            timestamp,
        });
        self.transition(Stage::Active);
    }

    fn send_image(&mut self, image: &ImageAttachment) {
        if !self.stage.is_chatting() {
            debug!("Not sending image in {:?}", self.stage);
            return;
        }

        self.pending_image_request = false;
        self.conversation.remove_received_image_requests();

        let image_data = image.to_data_url();
        let sender = self.sender();
        let timestamp = now_timestamp();
        self.send(Envelope::Image {
            image_data: image_data.clone(),
            name: self.profile.display_name.clone(),
            sender: sender.clone(),
            timestamp: timestamp.clone(),
        });
        self.conversation.push(ChatMessage::Image {
            image_data,
            sender,
            display_name: self.profile.display_name.clone(),
            timestamp,
        });
        self.transition(Stage::Active);
    }

    fn request_image(&mut self) {
        if !self.stage.is_chatting() {
            return;
        }
        let timestamp = now_timestamp();
        self.send(Envelope::ImageRequest {
            name: self.profile.display_name.clone(),
            sender: self.sender(),
            timestamp: timestamp.clone(),
        });
        self.conversation.push(ChatMessage::ImageRequestSent { timestamp });
        self.transition(Stage::Active);
    }

    fn sender(&self) -> String {
        self.identity.clone().unwrap_or_default()
    }

    /// Queue an envelope if the channel is open, otherwise drop it
    fn send(&mut self, envelope: Envelope) {
        if matches!(self.channel, ChannelPhase::Open(_)) {
            self.outputs.push_back(Output::Send(envelope));
        } else {
            debug!("Channel not open, dropping {}", envelope.kind());
        }
    }
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(video: bool) -> SessionProfile {
        SessionProfile {
            endpoint: Endpoint::new("ws", "localhost:8080"),
            display_name: "ann".to_string(),
            interests: vec!["rust".to_string()],
            typing_quiescence: Duration::from_millis(2000),
            video,
        }
    }

    fn drain(session: &mut PairingSession) -> Vec<Output> {
        std::iter::from_fn(|| session.poll_output()).collect()
    }

    fn sent(outputs: &[Output]) -> Vec<Envelope> {
        outputs
            .iter()
            .filter_map(|o| match o {
                Output::Send(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    fn envelope(session: &mut PairingSession, generation: u64, envelope: Envelope) {
        session.handle_channel_event(generation, ChannelEvent::Envelope(envelope));
    }

    fn partner(id: &str) -> Envelope {
        Envelope::PartnerId {
            partner_id: Some(id.to_string()),
            matched_interest: None,
        }
    }

    fn no_partner() -> Envelope {
        Envelope::PartnerId {
            partner_id: None,
            matched_interest: None,
        }
    }

    fn incoming_text(text: &str) -> Envelope {
        Envelope::Message {
            text: text.to_string(),
            name: "bob".to_string(),
            sender: "b-2".to_string(),
            timestamp: String::new(),
        }
    }

    fn incoming_image_request() -> Envelope {
        Envelope::ImageRequest {
            name: "bob".to_string(),
            sender: "b-2".to_string(),
            timestamp: String::new(),
        }
    }

    /// Started, open, identified and paired with "b-2" on channel #1
    fn paired(video: bool) -> PairingSession {
        let mut session = PairingSession::new(profile(video));
        session.handle_command(Command::StartNew);
        session.handle_channel_event(1, ChannelEvent::Opened);
        envelope(&mut session, 1, Envelope::Id { id: "a-1".into() });
        envelope(&mut session, 1, partner("b-2"));
        drain(&mut session);
        session
    }

    #[test]
    fn test_start_opens_channel_and_requests_id() {
        let mut session = PairingSession::new(profile(false));
        assert_eq!(session.stage(), Stage::Disconnected);

        session.handle_command(Command::StartNew);
        assert_eq!(session.stage(), Stage::Connecting);
        let outputs = drain(&mut session);
        assert_eq!(outputs.len(), 1);
        match &outputs[0] {
            Output::OpenChannel { generation, url } => {
                assert_eq!(*generation, 1);
                assert!(url.starts_with("ws://localhost:8080/ws?id=&name=ann&interests="));
            }
            other => panic!("expected OpenChannel, got {:?}", other),
        }

        session.handle_channel_event(1, ChannelEvent::Opened);
        assert_eq!(sent(&drain(&mut session)), vec![Envelope::GetId]);
        assert_eq!(session.stage(), Stage::Connecting);
    }

    #[test]
    fn test_pairing_survives_interleaved_typing() {
        let mut session = PairingSession::new(profile(false));
        session.handle_command(Command::StartNew);
        session.handle_channel_event(1, ChannelEvent::Opened);
        drain(&mut session);

        envelope(&mut session, 1, Envelope::Typing);
        envelope(&mut session, 1, Envelope::Id { id: "a-1".into() });
        assert_eq!(session.stage(), Stage::Connecting);
        assert_eq!(session.identity(), Some("a-1"));
        envelope(&mut session, 1, Envelope::NotTyping);
        envelope(&mut session, 1, Envelope::Typing);
        envelope(&mut session, 1, partner("b-2"));

        assert_eq!(session.stage(), Stage::Active);
        assert!(session.is_partner_connected());
        assert_eq!(
            sent(&drain(&mut session)),
            vec![Envelope::PartnerName { name: "ann".into() }]
        );
    }

    #[test]
    fn test_inbound_chat_appends_in_arrival_order() {
        let mut session = paired(false);
        envelope(&mut session, 1, Envelope::PartnerName { name: "bob".into() });
        envelope(&mut session, 1, incoming_text("one"));
        session.handle_command(Command::SendText("two".into()));
        envelope(&mut session, 1, incoming_text("three"));

        let texts: Vec<_> = session
            .conversation()
            .iter()
            .map(|m| match m {
                ChatMessage::Text { text, .. } => text.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert_eq!(session.partner_name(), "bob");
        assert!(session.conversation().entries()[1].is_own(session.identity()));
        assert!(!session.conversation().entries()[0].is_own(session.identity()));
    }

    #[test]
    fn test_typing_indicator_has_no_stage_effect() {
        let mut session = paired(false);
        envelope(&mut session, 1, Envelope::Typing);
        assert!(session.is_partner_typing());
        envelope(&mut session, 1, Envelope::NotTyping);
        assert!(!session.is_partner_typing());
        assert_eq!(session.stage(), Stage::Active);
    }

    #[test]
    fn test_image_request_sets_flag_and_sending_image_clears_it() {
        let mut session = paired(false);
        envelope(&mut session, 1, incoming_image_request());
        envelope(&mut session, 1, incoming_text("please"));
        envelope(&mut session, 1, incoming_image_request());
        assert!(session.pending_image_request());
        assert_eq!(session.conversation().len(), 3);
        drain(&mut session);

        let image = ImageAttachment::new("image/png", vec![1, 2, 3]);
        session.handle_command(Command::SendImage(Some(image.clone())));

        assert!(!session.pending_image_request());
        let entries = session.conversation().entries();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0], ChatMessage::Text { .. }));
        match &entries[1] {
            ChatMessage::Image { image_data, sender, .. } => {
                assert_eq!(image_data, &image.to_data_url());
                assert_eq!(sender, "a-1");
            }
            other => panic!("expected image entry, got {:?}", other),
        }

        let outputs = sent(&drain(&mut session));
        assert_eq!(outputs.len(), 1);
        assert!(matches!(&outputs[0], Envelope::Image { sender, .. } if sender == "a-1"));
    }

    #[test]
    fn test_send_image_without_file_only_prompts() {
        let mut session = paired(false);
        session.handle_command(Command::SendImage(None));

        assert_eq!(session.stage(), Stage::Active);
        assert_eq!(
            drain(&mut session),
            vec![Output::Prompt(Prompt::SelectImage)]
        );
        assert!(session.conversation().is_empty());
    }

    #[test]
    fn test_request_image_records_sent_request() {
        let mut session = paired(false);
        session.handle_command(Command::RequestImage);
        let outputs = sent(&drain(&mut session));
        assert!(matches!(&outputs[..], [Envelope::ImageRequest { name, .. }] if name == "ann"));
        assert!(matches!(
            session.conversation().entries(),
            [ChatMessage::ImageRequestSent { .. }]
        ));
    }

    #[test]
    fn test_no_partner_then_start_new_resets_before_get_id() {
        let mut session = PairingSession::new(profile(false));
        session.handle_command(Command::StartNew);
        session.handle_channel_event(1, ChannelEvent::Opened);
        envelope(&mut session, 1, Envelope::Id { id: "a-1".into() });
        envelope(&mut session, 1, no_partner());
        assert_eq!(session.stage(), Stage::Disconnected);
        assert!(session.waiting_for_partner());
        drain(&mut session);

        session.handle_command(Command::StartNew);
        assert_eq!(session.stage(), Stage::Connecting);
        assert_eq!(session.partner_id(), None);
        assert_eq!(session.identity(), None);
        assert!(session.conversation().is_empty());

        let outputs = drain(&mut session);
        assert_eq!(outputs[0], Output::CloseChannel { generation: 1 });
        match &outputs[1] {
            Output::OpenChannel { generation, url } => {
                assert_eq!(*generation, 2);
                // Previous identity is handed back to the server
                assert!(url.contains("id=a-1&"));
            }
            other => panic!("expected OpenChannel, got {:?}", other),
        }
        assert_eq!(outputs.len(), 2);

        session.handle_channel_event(2, ChannelEvent::Opened);
        assert_eq!(sent(&drain(&mut session)), vec![Envelope::GetId]);
    }

    #[test]
    fn test_late_pairing_on_open_channel() {
        let mut session = PairingSession::new(profile(false));
        session.handle_command(Command::StartNew);
        session.handle_channel_event(1, ChannelEvent::Opened);
        envelope(&mut session, 1, no_partner());
        assert_eq!(session.stage(), Stage::Disconnected);

        envelope(&mut session, 1, partner("b-2"));
        assert_eq!(session.stage(), Stage::Active);
        assert!(!session.waiting_for_partner());
    }

    #[test]
    fn test_bad_endpoint_reports_and_stays_disconnected() {
        let mut session = PairingSession::new(SessionProfile {
            endpoint: Endpoint::new("wss", "bad host"),
            ..profile(false)
        });
        session.handle_command(Command::StartNew);
        assert!(matches!(
            &drain(&mut session)[..],
            [Output::ConnectionLost(ConnectionError::InvalidEndpoint(_))]
        ));
        assert_eq!(session.stage(), Stage::Disconnected);
        assert!(!session.connect_in_flight());
    }

    #[test]
    fn test_start_new_ignored_while_connect_in_flight() {
        let mut session = PairingSession::new(profile(false));
        session.handle_command(Command::StartNew);
        drain(&mut session);

        // Second request while the first is still connecting
        session.handle_command(Command::StartNew);
        assert!(drain(&mut session).is_empty());
        assert!(session.connect_in_flight());
    }

    #[test]
    fn test_stop_then_confirm_is_two_step_and_idempotent() {
        let mut session = paired(false);

        session.handle_command(Command::StopRequested);
        assert_eq!(session.stage(), Stage::ConfirmDisconnect);
        assert!(drain(&mut session).is_empty());

        session.handle_command(Command::ConfirmDisconnect);
        session.handle_command(Command::ConfirmDisconnect);
        let outputs = drain(&mut session);
        assert_eq!(
            outputs,
            vec![
                Output::Send(Envelope::Disconnect),
                Output::CloseChannel { generation: 1 },
            ]
        );
        assert_eq!(session.stage(), Stage::Disconnected);
        assert!(!session.is_partner_connected());
    }

    #[test]
    fn test_sending_from_confirm_disconnect_resumes_chat() {
        let mut session = paired(false);
        session.handle_command(Command::StopRequested);
        session.handle_command(Command::SendText("wait".into()));
        assert_eq!(session.stage(), Stage::Active);
    }

    #[test]
    fn test_partner_traffic_during_confirm_disconnect_resumes_chat() {
        let mut session = paired(false);
        session.handle_command(Command::StopRequested);
        envelope(
            &mut session,
            1,
            Envelope::Message {
                text: "still there?".into(),
                name: "bob".into(),
                sender: "b-2".into(),
                timestamp: String::new(),
            },
        );
        assert_eq!(session.stage(), Stage::Active);
        assert_eq!(session.conversation().len(), 1);

        session.handle_command(Command::StopRequested);
        envelope(
            &mut session,
            1,
            Envelope::ImageRequest {
                name: "bob".into(),
                sender: "b-2".into(),
                timestamp: String::new(),
            },
        );
        assert_eq!(session.stage(), Stage::Active);
        assert!(session.pending_image_request());

        // Typing alone does not cancel the confirmation
        session.handle_command(Command::StopRequested);
        envelope(&mut session, 1, Envelope::Typing);
        assert_eq!(session.stage(), Stage::ConfirmDisconnect);
    }

    #[test]
    fn test_remote_disconnect_closes_channel_without_sending() {
        let mut session = paired(false);
        envelope(&mut session, 1, Envelope::Disconnect);

        assert_eq!(session.stage(), Stage::Disconnected);
        assert!(session.partner_left());
        assert_eq!(
            drain(&mut session),
            vec![Output::CloseChannel { generation: 1 }]
        );
    }

    #[test]
    fn test_connection_error_forces_disconnected() {
        let mut session = paired(false);
        let error = ConnectionError::Dropped("reset".into());
        session.handle_channel_event(1, ChannelEvent::Closed(Some(error.clone())));

        assert_eq!(session.stage(), Stage::Disconnected);
        assert_eq!(drain(&mut session), vec![Output::ConnectionLost(error)]);

        // No automatic reconnect; a new cycle is allowed
        session.handle_command(Command::StartNew);
        assert!(matches!(
            &drain(&mut session)[..],
            [Output::OpenChannel { generation: 2, .. }]
        ));
    }

    #[test]
    fn test_stale_channel_events_are_ignored() {
        let mut session = paired(false);
        envelope(&mut session, 1, no_partner());
        session.handle_command(Command::StartNew);
        drain(&mut session);

        session.handle_channel_event(1, ChannelEvent::Closed(None));
        envelope(&mut session, 1, partner("c-3"));
        assert_eq!(session.stage(), Stage::Connecting);
        assert!(session.connect_in_flight());
        assert!(drain(&mut session).is_empty());
    }

    #[test]
    fn test_malformed_envelope_is_discarded() {
        let mut session = paired(false);
        session.handle_channel_event(
            1,
            ChannelEvent::Malformed(crate::error::ProtocolError::NotAnObject),
        );
        assert_eq!(session.stage(), Stage::Active);
        assert!(drain(&mut session).is_empty());
    }

    #[test]
    fn test_typing_debounce_uses_newest_token() {
        let mut session = paired(false);
        session.handle_command(Command::Keystroke);
        session.handle_command(Command::Keystroke);
        let outputs = drain(&mut session);
        assert_eq!(
            outputs,
            vec![
                Output::Send(Envelope::Typing),
                Output::ScheduleNotTyping {
                    token: 1,
                    after: Duration::from_millis(2000)
                },
                Output::Send(Envelope::Typing),
                Output::ScheduleNotTyping {
                    token: 2,
                    after: Duration::from_millis(2000)
                },
            ]
        );

        session.handle_typing_quiesced(1);
        assert!(drain(&mut session).is_empty());
        session.handle_typing_quiesced(2);
        assert_eq!(drain(&mut session), vec![Output::Send(Envelope::NotTyping)]);
    }

    #[test]
    fn test_sending_message_preempts_typing_window() {
        let mut session = paired(false);
        session.handle_command(Command::Keystroke);
        drain(&mut session);

        session.handle_command(Command::SendText("hi".into()));
        let envelopes = sent(&drain(&mut session));
        assert_eq!(envelopes[0], Envelope::NotTyping);
        assert!(matches!(&envelopes[1], Envelope::Message { text, .. } if text == "hi"));

        // Timer firing later sends nothing
        session.handle_typing_quiesced(1);
        assert!(drain(&mut session).is_empty());
    }

    #[test]
    fn test_blank_text_is_not_sent() {
        let mut session = paired(false);
        session.handle_command(Command::SendText("   ".into()));
        assert!(drain(&mut session).is_empty());
        assert!(session.conversation().is_empty());
    }

    #[test]
    fn test_video_partner_ready_after_both_ids_in_any_order() {
        let mut session = PairingSession::new(profile(true));
        session.handle_command(Command::StartNew);
        session.handle_channel_event(1, ChannelEvent::Opened);
        envelope(&mut session, 1, partner("b-2"));
        assert!(!drain(&mut session)
            .iter()
            .any(|o| matches!(o, Output::Call(_))));

        envelope(&mut session, 1, Envelope::Id { id: "a-1".into() });
        assert_eq!(
            drain(&mut session),
            vec![Output::Call(CallSignal::PartnerReady {
                local_id: "a-1".into(),
                partner_id: "b-2".into(),
            })]
        );
    }

    #[test]
    fn test_video_offer_before_own_id_still_starts_call() {
        let mut session = PairingSession::new(profile(true));
        session.handle_command(Command::StartNew);
        session.handle_channel_event(1, ChannelEvent::Opened);
        envelope(&mut session, 1, partner("a-0"));
        let offer = Envelope::Offer {
            offer: SessionDescription::offer("v=0"),
            sender: "a-0".into(),
        };
        envelope(&mut session, 1, offer);
        drain(&mut session);

        envelope(&mut session, 1, Envelope::Id { id: "b-1".into() });
        assert_eq!(
            drain(&mut session),
            vec![Output::Call(CallSignal::PartnerReady {
                local_id: "b-1".into(),
                partner_id: "a-0".into(),
            })]
        );

        // A second id does not restart the call
        envelope(&mut session, 1, Envelope::Id { id: "b-1".into() });
        assert!(drain(&mut session).is_empty());
    }

    #[test]
    fn test_video_disconnect_ends_call_before_closing_channel() {
        let mut session = paired(true);
        session.handle_command(Command::StopRequested);
        session.handle_command(Command::ConfirmDisconnect);
        assert_eq!(
            drain(&mut session),
            vec![
                Output::Call(CallSignal::End),
                Output::Send(Envelope::Disconnect),
                Output::CloseChannel { generation: 1 },
            ]
        );
    }

    #[test]
    fn test_call_signals_ignored_in_text_mode() {
        let mut session = paired(false);
        envelope(
            &mut session,
            1,
            Envelope::Offer {
                offer: SessionDescription::offer("v=0"),
                sender: "b-2".into(),
            },
        );
        assert!(drain(&mut session).is_empty());
    }
}
