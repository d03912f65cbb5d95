//! Bridge Session State Machine
//!
//! One [`CallSession`] exists per phone call. It is a plain value: the service
//! decodes messages from either transport, feeds them in, and carries out the
//! returned [`Effect`]s. Keeping the machine free of I/O makes every ordering
//! rule checkable without sockets.
//!
//! ```text
//! AwaitingStart --start--> ConnectingAgent --agent ready--> Streaming
//!       \                        \                              \
//!        +------------------------+------------------------------+--> Closed
//! ```

use crate::{
    call_record::{Speaker, TrafficStats, TranscriptEntry},
    framer::AudioFramer,
    protocol::{
        agent::{AgentEvent, AgentInbound, AgentOutbound},
        telephony::{FROM_PARAMETER, MediaChunk, StreamStart, TO_PARAMETER, TelephonyCommand, TelephonyEvent},
    },
    settings::AgentSettings,
};
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    AwaitingStart,
    ConnectingAgent,
    Streaming,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::AwaitingStart => "awaiting_start",
            SessionState::ConnectingAgent => "connecting_agent",
            SessionState::Streaming => "streaming",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session reached `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    TelephonyStopped,
    TelephonyClosed,
    AgentClosed,
    AgentConnectFailed,
    UnknownAgent,
    ConfigurationUnavailable,
    TransportError,
    IdleTimeout,
    MaxDurationReached,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::TelephonyStopped => "telephony stream stopped",
            CloseReason::TelephonyClosed => "telephony connection closed",
            CloseReason::AgentClosed => "agent connection closed",
            CloseReason::AgentConnectFailed => "agent connection failed",
            CloseReason::UnknownAgent => "unknown agent",
            CloseReason::ConfigurationUnavailable => "configuration lookup failed",
            CloseReason::TransportError => "transport error",
            CloseReason::IdleTimeout => "idle timeout",
            CloseReason::MaxDurationReached => "maximum call duration reached",
        }
    }

    /// Whether the call should be reported as failed rather than completed.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CloseReason::AgentConnectFailed
                | CloseReason::UnknownAgent
                | CloseReason::ConfigurationUnavailable
                | CloseReason::TransportError
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the telephony side told us when the stream started.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamInfo {
    pub stream_sid: String,
    pub call_sid: Option<String>,
    pub agent_id: Option<String>,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
}

impl From<&StreamStart> for StreamInfo {
    fn from(start: &StreamStart) -> Self {
        Self {
            stream_sid: start.stream_sid.clone(),
            call_sid: start.call_sid.clone(),
            agent_id: start.agent_id().map(str::to_string),
            from_number: start.parameter(FROM_PARAMETER).map(str::to_string),
            to_number: start.parameter(TO_PARAMETER).map(str::to_string),
        }
    }
}

/// An action the driver must carry out, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Look up the agent's configuration and open the agent transport.
    ConnectAgent(StreamInfo),
    SendAgent(AgentOutbound),
    SendTelephony(TelephonyCommand),
    Close(CloseReason),
}

#[derive(Debug)]
pub struct CallSession {
    state: SessionState,
    stream: Option<StreamInfo>,
    framer: AudioFramer,
    handshake_sent: bool,
    traffic: TrafficStats,
    transcript: Vec<TranscriptEntry>,
}

impl CallSession {
    pub fn new(frame_size: usize) -> Self {
        Self {
            state: SessionState::AwaitingStart,
            stream: None,
            framer: AudioFramer::new(frame_size),
            handshake_sent: false,
            traffic: TrafficStats::default(),
            transcript: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stream(&self) -> Option<&StreamInfo> {
        self.stream.as_ref()
    }

    pub fn stream_sid(&self) -> Option<&str> {
        self.stream.as_ref().map(|s| s.stream_sid.as_str())
    }

    pub fn traffic(&self) -> TrafficStats {
        self.traffic
    }

    /// Caller audio waiting for a complete frame.
    pub fn buffered(&self) -> usize {
        self.framer.buffered()
    }

    pub fn take_transcript(&mut self) -> Vec<TranscriptEntry> {
        std::mem::take(&mut self.transcript)
    }

    /// Feeds one decoded telephony event.
    pub fn handle_telephony(&mut self, event: TelephonyEvent) -> Vec<Effect> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }

        match event {
            TelephonyEvent::Stop { .. } => {
                info!("Telephony stream stopped");
                vec![Effect::Close(CloseReason::TelephonyStopped)]
            }
            TelephonyEvent::Start { start } => {
                if self.state != SessionState::AwaitingStart {
                    warn!(stream_sid = %start.stream_sid, "Ignoring repeated start event");
                    return Vec::new();
                }
                let info = StreamInfo::from(&start);
                info!(stream_sid = %info.stream_sid, agent_id = ?info.agent_id, "Telephony stream started");
                self.stream = Some(info.clone());
                self.state = SessionState::ConnectingAgent;
                vec![Effect::ConnectAgent(info)]
            }
            TelephonyEvent::Media { media } => self.accept_media(media),
            TelephonyEvent::Connected { protocol } => {
                debug!(?protocol, "Telephony transport connected");
                Vec::new()
            }
            TelephonyEvent::Mark { mark } => {
                debug!(mark = %mark.name, "Playback mark reached");
                Vec::new()
            }
            TelephonyEvent::Dtmf { dtmf } => {
                info!(digit = %dtmf.digit, "Caller pressed a key");
                Vec::new()
            }
            TelephonyEvent::Unrecognized => {
                debug!("Ignoring unrecognized telephony event");
                Vec::new()
            }
        }
    }

    fn accept_media(&mut self, media: MediaChunk) -> Vec<Effect> {
        if self.state == SessionState::AwaitingStart {
            debug!("Dropping media received before stream start");
            return Vec::new();
        }
        if !media.is_inbound() {
            trace!(track = ?media.track, "Ignoring non-inbound media");
            return Vec::new();
        }
        let audio = match media.decode_payload() {
            Ok(audio) => audio,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable media payload");
                return Vec::new();
            }
        };
        self.traffic.inbound_bytes += audio.len() as u64;
        self.framer.push(&audio);

        // Frames wait in the buffer until the handshake has gone out.
        if self.state == SessionState::Streaming {
            self.drain_frames()
        } else {
            Vec::new()
        }
    }

    fn drain_frames(&mut self) -> Vec<Effect> {
        let frames = self.framer.drain_frames();
        self.traffic.frames_forwarded += frames.len() as u64;
        frames
            .into_iter()
            .map(|frame| Effect::SendAgent(AgentOutbound::Audio(frame)))
            .collect()
    }

    /// Called once the agent transport is open. Emits the handshake followed
    /// by any audio that was buffered while connecting.
    pub fn agent_connected(&mut self, settings: AgentSettings) -> Vec<Effect> {
        if self.state != SessionState::ConnectingAgent || self.handshake_sent {
            warn!(state = %self.state, "Ignoring agent connection outside of connecting state");
            return Vec::new();
        }
        self.handshake_sent = true;
        self.state = SessionState::Streaming;

        let mut effects = vec![Effect::SendAgent(AgentOutbound::Settings(Box::new(settings)))];
        effects.extend(self.drain_frames());
        effects
    }

    /// Feeds one message from the agent transport.
    pub fn handle_agent(&mut self, inbound: AgentInbound) -> Vec<Effect> {
        if self.state != SessionState::Streaming {
            debug!(state = %self.state, "Ignoring agent message outside of streaming state");
            return Vec::new();
        }
        let Some(stream) = self.stream.as_ref() else {
            return Vec::new();
        };

        match inbound {
            AgentInbound::Audio(audio) => {
                self.traffic.outbound_chunks += 1;
                self.traffic.outbound_bytes += audio.len() as u64;
                vec![Effect::SendTelephony(TelephonyCommand::media(
                    &stream.stream_sid,
                    &audio,
                ))]
            }
            AgentInbound::Event(AgentEvent::UserStartedSpeaking) => {
                debug!("Caller barged in, clearing playback");
                self.traffic.interruptions += 1;
                vec![Effect::SendTelephony(TelephonyCommand::clear(
                    &stream.stream_sid,
                ))]
            }
            AgentInbound::Event(AgentEvent::ConversationText { role, content }) => {
                debug!(%role, "Conversation text");
                self.transcript.push(TranscriptEntry {
                    role: Speaker::from_role(&role),
                    message: content,
                    timestamp: Utc::now(),
                });
                Vec::new()
            }
            AgentInbound::Event(AgentEvent::Error { description, code }) => {
                error!(?code, ?description, "Agent reported an error");
                Vec::new()
            }
            AgentInbound::Event(AgentEvent::Warning { description }) => {
                warn!(?description, "Agent reported a warning");
                Vec::new()
            }
            AgentInbound::Event(event) => {
                debug!(?event, "Agent event");
                Vec::new()
            }
        }
    }

    /// Moves to `Closed` and discards buffered audio. Returns the number of
    /// bytes dropped. Closing twice is a no-op.
    pub fn close(&mut self, reason: CloseReason) -> usize {
        if self.state == SessionState::Closed {
            return 0;
        }
        info!(%reason, from = %self.state, "Closing session");
        self.state = SessionState::Closed;
        self.framer.discard()
    }
}
