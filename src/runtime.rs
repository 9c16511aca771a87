// Session runtime: runs the engine on its own thread with a tokio runtime
// The caller talks to it through a `SessionClient`

use anyhow::{Context, Result};
use std::io;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::{Effect, Input, SessionEngine, SessionView};
use crate::media::{MediaSource, StaticMediaSource};
use crate::negotiation::{PeerFactory, Str0mPeerFactory};
use crate::session::{Command, Prompt, SessionProfile};
use crate::signaling::{ChannelEventReceiver, ChannelEventSender, SignalingChannel};

/// How often the peer connection is pumped while a call exists
const PUMP_INTERVAL: Duration = Duration::from_millis(10);

/// Time given to the channel task to flush its last frames on shutdown
const CLOSE_GRACE: Duration = Duration::from_millis(100);

/// What the session thread reports back
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Read state changed
    Updated(SessionView),
    Prompt(Prompt),
    Error(String),
    Stopped,
}

enum Request {
    Command(Command),
    Shutdown,
}

/// Handle to a running session
pub struct SessionClient {
    requests: mpsc::UnboundedSender<Request>,
    events: std_mpsc::Receiver<SessionEvent>,
    thread: Option<JoinHandle<()>>,
}

impl SessionClient {
    pub fn send_command(&self, command: Command) -> io::Result<()> {
        self.requests
            .send(Request::Command(command))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "session thread has stopped"))
    }

    /// Non-blocking; `None` if nothing is pending
    pub fn try_recv_event(&self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    /// Block until the next event; `None` once the session thread is gone
    pub fn recv_event(&self) -> Option<SessionEvent> {
        self.events.recv().ok()
    }

    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<SessionEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Tear the session down and wait for the thread to finish
    pub fn shutdown(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        let _ = self.requests.send(Request::Shutdown);
        if handle.join().is_err() {
            error!("Session thread panicked");
        }
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start a session with the str0m peer stack and the configured media
pub fn start_session(config: &Config) -> Result<SessionClient> {
    start_session_with(
        SessionProfile::from_config(config),
        Str0mPeerFactory,
        config.ice.clone(),
        StaticMediaSource::new(&config.media),
    )
}

pub fn start_session_with<F, M>(
    profile: SessionProfile,
    factory: F,
    ice: crate::config::IceConfig,
    media: M,
) -> Result<SessionClient>
where
    F: PeerFactory + Send + 'static,
    M: MediaSource + 'static,
{
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = std_mpsc::channel();
    let rt = Runtime::new().context("failed to create tokio runtime")?;

    let thread = thread::Builder::new()
        .name("pairchat-session".to_string())
        .spawn(move || {
            info!("Session thread started");
            rt.block_on(async move {
                let (channel_tx, channel_rx) = mpsc::unbounded_channel();
                let (internal_tx, internal_rx) = mpsc::unbounded_channel();
                let driver = Driver {
                    engine: SessionEngine::new(profile, factory, ice),
                    media: Arc::new(media),
                    channel: None,
                    channel_tx,
                    internal_tx,
                    events: event_tx,
                    last_view: None,
                };
                driver.run(request_rx, channel_rx, internal_rx).await;
            });
            info!("Session thread ending");
        })
        .context("failed to spawn session thread")?;

    Ok(SessionClient {
        requests: request_tx,
        events: event_rx,
        thread: Some(thread),
    })
}

/// Owns the engine and every live resource; effects are executed in order
struct Driver<F: PeerFactory, M: MediaSource> {
    engine: SessionEngine<F>,
    media: Arc<M>,
    channel: Option<SignalingChannel>,
    channel_tx: ChannelEventSender,
    /// Timer expiries and media results come back through here
    internal_tx: mpsc::UnboundedSender<Input>,
    events: std_mpsc::Sender<SessionEvent>,
    last_view: Option<SessionView>,
}

impl<F: PeerFactory, M: MediaSource + 'static> Driver<F, M> {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut channel_events: ChannelEventReceiver,
        mut internal: mpsc::UnboundedReceiver<Input>,
    ) {
        self.handle(Input::Command(Command::StartNew));

        let mut pump = tokio::time::interval(PUMP_INTERVAL);
        pump.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Command(command)) => self.handle(Input::Command(command)),
                    Some(Request::Shutdown) | None => {
                        self.handle(Input::Shutdown);
                        break;
                    }
                },
                Some((generation, event)) = channel_events.recv() => {
                    self.handle(Input::Channel { generation, event });
                }
                Some(input) = internal.recv() => self.handle(input),
                _ = pump.tick(), if self.engine.needs_tick() => {
                    self.handle(Input::Tick(Instant::now()));
                }
            }
        }

        tokio::time::sleep(CLOSE_GRACE).await;
        let _ = self.events.send(SessionEvent::Stopped);
    }

    fn handle(&mut self, input: Input) {
        self.engine.handle(input);
        while let Some(effect) = self.engine.poll_effect() {
            self.execute(effect);
        }
        self.publish_view();
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::OpenChannel { generation, url } => {
                if let Some(mut stale) = self.channel.take() {
                    stale.close();
                }
                self.channel = Some(SignalingChannel::connect(url, generation, self.channel_tx.clone()));
            }
            Effect::Send(envelope) => match &self.channel {
                Some(channel) => {
                    if let Err(e) = channel.send(&envelope) {
                        warn!("Could not send {}: {}", envelope.kind(), e);
                    }
                }
                None => debug!("No channel, dropping {}", envelope.kind()),
            },
            Effect::CloseChannel { generation } => {
                if self.channel.as_ref().map(SignalingChannel::generation) == Some(generation) {
                    if let Some(mut channel) = self.channel.take() {
                        channel.close();
                    }
                }
            }
            Effect::ScheduleNotTyping { token, after } => {
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = tx.send(Input::TypingQuiesced { token });
                });
            }
            Effect::AcquireMedia => {
                let media = Arc::clone(&self.media);
                let tx = self.internal_tx.clone();
                tokio::task::spawn_blocking(move || {
                    let _ = tx.send(Input::MediaAcquired(media.acquire()));
                });
            }
            Effect::Prompt(prompt) => {
                let _ = self.events.send(SessionEvent::Prompt(prompt));
            }
            Effect::Report(e) => {
                warn!("{}", e);
                let _ = self.events.send(SessionEvent::Error(e.to_string()));
            }
        }
    }

    fn publish_view(&mut self) {
        let view = self.engine.view();
        if self.last_view.as_ref() == Some(&view) {
            return;
        }
        self.last_view = Some(view.clone());
        let _ = self.events.send(SessionEvent::Updated(view));
    }
}
