// Signaling channel: one WebSocket connection to the pairing server
// Knows nothing about pairing; it only moves envelopes and reports lifecycle

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::{ConnectionError, ProtocolError};
use crate::protocol::{decode_frame, Envelope};

/// Lifecycle and traffic of a channel, delivered in receipt order
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// WebSocket handshake completed
    Opened,

    /// A decoded inbound envelope
    Envelope(Envelope),

    /// An inbound frame that failed to decode
    Malformed(ProtocolError),

    /// The connection is gone; `None` when closed cleanly
    Closed(Option<ConnectionError>),
}

/// Events tagged with the generation of the channel that produced them
pub type ChannelEventSender = mpsc::UnboundedSender<(u64, ChannelEvent)>;
pub type ChannelEventReceiver = mpsc::UnboundedReceiver<(u64, ChannelEvent)>;

enum Outgoing {
    Frame(String),
    Close,
}

/// Handle to a running channel task
///
/// Outbound envelopes are queued and flushed in order once the socket is
/// open. Dropping the handle closes the connection.
pub struct SignalingChannel {
    generation: u64,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    task: JoinHandle<()>,
    closed: bool,
}

impl SignalingChannel {
    /// Start connecting to `url`; must be called inside a tokio runtime
    pub fn connect(url: String, generation: u64, events: ChannelEventSender) -> Self {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_channel(url, generation, outgoing_rx, events));

        Self {
            generation,
            outgoing,
            task,
            closed: false,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.closed || self.task.is_finished()
    }

    /// Queue an envelope for sending
    pub fn send(&self, envelope: &Envelope) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::NotOpen);
        }

        let frame = match envelope.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping unencodable {} envelope: {}", envelope.kind(), e);
                return Ok(());
            }
        };

        self.outgoing
            .send(Outgoing::Frame(frame))
            .map_err(|_| ConnectionError::NotOpen)
    }

    /// Close the connection; calling it again does nothing
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        debug!("Closing signaling channel #{}", self.generation);
        let _ = self.outgoing.send(Outgoing::Close);
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_channel(
    url: String,
    generation: u64,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: ChannelEventSender,
) {
    let emit = |event: ChannelEvent| {
        let _ = events.send((generation, event));
    };

    debug!("Connecting to signaling server: {}", url);
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            warn!("Signaling connect failed: {}", e);
            emit(ChannelEvent::Closed(Some(ConnectionError::Refused(e.to_string()))));
            return;
        }
    };
    info!("Connected to signaling server (channel #{})", generation);
    emit(ChannelEvent::Opened);

    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    loop {
        tokio::select! {
            out = outgoing.recv() => match out {
                Some(Outgoing::Frame(frame)) => {
                    if let Err(e) = ws_sink.send(Message::Text(frame)).await {
                        emit(ChannelEvent::Closed(Some(ConnectionError::Dropped(e.to_string()))));
                        return;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = ws_sink.close().await;
                    emit(ChannelEvent::Closed(None));
                    return;
                }
            },
            inbound = ws_stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => deliver(&text, &emit),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => deliver(text, &emit),
                    Err(e) => emit(ChannelEvent::Malformed(ProtocolError::Malformed(e.to_string()))),
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("Signaling server closed channel #{}", generation);
                    emit(ChannelEvent::Closed(None));
                    return;
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Signaling channel #{} failed: {}", generation, e);
                    emit(ChannelEvent::Closed(Some(ConnectionError::Dropped(e.to_string()))));
                    return;
                }
            },
        }
    }
}

fn deliver(text: &str, emit: &impl Fn(ChannelEvent)) {
    match decode_frame(text) {
        Ok(envelopes) => {
            for envelope in envelopes {
                emit(ChannelEvent::Envelope(envelope));
            }
        }
        Err(e) => emit(ChannelEvent::Malformed(e)),
    }
}
