//! Drives one bridged call between the telephony and agent transports.

use super::transport::{Link, WireMessage};
use crate::{registry::SessionHandle, state::AppState};
use anyhow::Result;
use axum::{
    extract::{State, ws::WebSocketUpgrade},
    response::Response,
};
use chrono::{DateTime, Utc};
use std::{future::Future, pin::Pin, sync::Arc, time::Duration};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, error, info, instrument, warn};
use voiceagent_core::{
    agent_config::AgentConfiguration,
    call_record::{CallRecord, CallStatus},
    protocol::{
        agent::{self, AgentInbound, AgentOutbound},
        telephony,
    },
    session::{CallSession, CloseReason, Effect, SessionState, StreamInfo},
    settings::{AgentSettings, build_settings},
};

/// Axum handler to upgrade the telephony provider's connection to a media stream.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let handle = state.registry.accept();
    ws.on_upgrade(move |socket| run_session(state, handle, Link::from_axum("telephony", socket)))
}

/// Runs one session to completion: both links are closed and the call record
/// has been handed off by the time this returns.
#[instrument(name = "bridge_session", skip_all, fields(session_id = %handle.id(), stream_sid, agent_id))]
pub async fn run_session(state: Arc<AppState>, handle: SessionHandle, telephony: Link) {
    info!("Media stream connected. Awaiting start...");
    let mut bridge = Bridge {
        session: CallSession::new(state.config.frame_bytes),
        state,
        handle,
        telephony,
        agent: None,
        pending_agent: None,
        agent_config: None,
        max_deadline: None,
        started_at: Utc::now(),
    };
    let reason = bridge.run().await;
    bridge.teardown(reason).await;
}

struct Bridge {
    state: Arc<AppState>,
    handle: SessionHandle,
    session: CallSession,
    telephony: Link,
    agent: Option<Link>,
    /// Configuration lookup plus agent connect, polled alongside both links.
    pending_agent: Option<PendingAgent>,
    agent_config: Option<AgentConfiguration>,
    max_deadline: Option<Instant>,
    started_at: DateTime<Utc>,
}

type AgentReady = Result<(AgentConfiguration, Link), CloseReason>;
type PendingAgent = Pin<Box<dyn Future<Output = AgentReady> + Send>>;

enum Step {
    Telephony(Option<Result<WireMessage>>),
    Agent(Option<Result<WireMessage>>),
    AgentReady(AgentReady),
    Deadline(CloseReason),
}

async fn next_from(link: &mut Option<Link>) -> Option<Result<WireMessage>> {
    match link {
        Some(link) => link.next().await,
        None => std::future::pending().await,
    }
}

async fn until_ready(pending: &mut Option<PendingAgent>) -> AgentReady {
    match pending {
        Some(fut) => fut.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Looks up the agent's configuration and opens the agent transport. Each
/// step is bounded by the connect timeout.
async fn open_agent(
    state: Arc<AppState>,
    agent_id: String,
    stream_sid: String,
) -> AgentReady {
    let limit = state.config.agent_connect_timeout;

    let config = match timeout(limit, state.agents.agent_configuration(&agent_id)).await {
        Ok(Ok(Some(config))) => config,
        Ok(Ok(None)) => {
            warn!("No configuration found for agent");
            return Err(CloseReason::UnknownAgent);
        }
        Ok(Err(e)) => {
            error!(error = ?e, "Failed to load agent configuration");
            return Err(CloseReason::ConfigurationUnavailable);
        }
        Err(_) => {
            error!(timeout = ?limit, "Timed out loading agent configuration");
            return Err(CloseReason::ConfigurationUnavailable);
        }
    };

    match timeout(limit, state.connector.connect(&stream_sid)).await {
        Ok(Ok(link)) => Ok((config, link)),
        Ok(Err(e)) => {
            error!(error = ?e, "Failed to connect to agent transport");
            Err(CloseReason::AgentConnectFailed)
        }
        Err(_) => {
            error!(timeout = ?limit, "Timed out connecting to agent transport");
            Err(CloseReason::AgentConnectFailed)
        }
    }
}

impl Bridge {
    async fn run(&mut self) -> CloseReason {
        let idle_timeout = self.state.config.session_idle_timeout;
        let mut idle_deadline = idle_timeout.map(|d| Instant::now() + d);

        loop {
            let step = tokio::select! {
                msg = self.telephony.next() => Step::Telephony(msg),
                msg = next_from(&mut self.agent) => Step::Agent(msg),
                ready = until_ready(&mut self.pending_agent) => Step::AgentReady(ready),
                _ = wait_until(idle_deadline) => Step::Deadline(CloseReason::IdleTimeout),
                _ = wait_until(self.max_deadline) => Step::Deadline(CloseReason::MaxDurationReached),
            };

            let effects = match step {
                Step::Telephony(msg) => {
                    idle_deadline = idle_timeout.map(|d| Instant::now() + d);
                    match msg {
                        Some(Ok(WireMessage::Text(text))) => match telephony::decode(&text) {
                            Ok(event) => self.session.handle_telephony(event),
                            Err(e) => {
                                warn!(error = %e, "Dropping malformed telephony message");
                                continue;
                            }
                        },
                        Some(Ok(WireMessage::Binary(data))) => {
                            debug!(len = data.len(), "Ignoring binary telephony frame");
                            continue;
                        }
                        Some(Ok(WireMessage::Close)) | None => return CloseReason::TelephonyClosed,
                        Some(Err(e)) => {
                            warn!(error = ?e, "Telephony connection failed");
                            return CloseReason::TransportError;
                        }
                    }
                }
                Step::Agent(msg) => match msg {
                    Some(Ok(WireMessage::Text(text))) => match agent::decode(&text) {
                        Ok(event) => self.session.handle_agent(AgentInbound::Event(event)),
                        Err(e) => {
                            warn!(error = %e, "Dropping malformed agent message");
                            continue;
                        }
                    },
                    Some(Ok(WireMessage::Binary(audio))) => {
                        self.session.handle_agent(AgentInbound::Audio(audio))
                    }
                    Some(Ok(WireMessage::Close)) | None => return CloseReason::AgentClosed,
                    Some(Err(e)) => {
                        warn!(error = ?e, "Agent connection failed");
                        return CloseReason::TransportError;
                    }
                },
                Step::AgentReady(ready) => {
                    self.pending_agent = None;
                    let (config, link) = match ready {
                        Ok(ready) => ready,
                        Err(reason) => return reason,
                    };
                    // The caller's idle allowance starts once the agent can hear them.
                    idle_deadline = idle_timeout.map(|d| Instant::now() + d);
                    let settings = self.agent_ready(config, link);
                    self.session.agent_connected(settings)
                }
                Step::Deadline(reason) => return reason,
            };

            if let Some(reason) = self.apply(effects).await {
                return reason;
            }
        }
    }

    /// Carries out effects in order. Returns a reason if the session must end.
    async fn apply(&mut self, effects: Vec<Effect>) -> Option<CloseReason> {
        for effect in effects {
            match effect {
                Effect::ConnectAgent(info) => {
                    if let Err(reason) = self.begin_connect(info) {
                        return Some(reason);
                    }
                }
                Effect::SendAgent(msg) => {
                    let Some(agent) = self.agent.as_mut() else {
                        error!("Agent message produced without an agent connection");
                        return Some(CloseReason::TransportError);
                    };
                    let wire = match msg {
                        AgentOutbound::Settings(settings) => match serde_json::to_string(&settings) {
                            Ok(json) => WireMessage::Text(json),
                            Err(e) => {
                                error!(error = %e, "Failed to encode agent settings");
                                return Some(CloseReason::TransportError);
                            }
                        },
                        AgentOutbound::Audio(frame) => WireMessage::Binary(frame),
                    };
                    if let Err(e) = agent.send(wire).await {
                        warn!(error = ?e, "Failed to send to agent transport");
                        return Some(CloseReason::TransportError);
                    }
                }
                Effect::SendTelephony(command) => {
                    let json = match command.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            error!(error = %e, "Failed to encode telephony command");
                            return Some(CloseReason::TransportError);
                        }
                    };
                    if let Err(e) = self.telephony.send(WireMessage::Text(json)).await {
                        warn!(error = ?e, "Failed to send to telephony transport");
                        return Some(CloseReason::TransportError);
                    }
                }
                Effect::Close(reason) => return Some(reason),
            }
        }
        None
    }

    /// Records the stream and starts the agent lookup. The loop keeps serving
    /// telephony while it runs; dropping the bridge cancels it.
    fn begin_connect(&mut self, info: StreamInfo) -> Result<(), CloseReason> {
        let span = tracing::Span::current();
        span.record("stream_sid", info.stream_sid.as_str());
        self.handle
            .set_stream(&info.stream_sid, info.agent_id.as_deref());
        self.handle.set_state(SessionState::ConnectingAgent);

        let Some(agent_id) = info.agent_id else {
            warn!("Stream started without an agent_id parameter");
            return Err(CloseReason::UnknownAgent);
        };
        span.record("agent_id", agent_id.as_str());

        self.pending_agent = Some(Box::pin(open_agent(
            self.state.clone(),
            agent_id,
            info.stream_sid,
        )));
        Ok(())
    }

    fn agent_ready(&mut self, config: AgentConfiguration, link: Link) -> AgentSettings {
        self.agent = Some(link);
        if config.max_conversation_duration_seconds > 0 {
            let cap = Duration::from_secs(u64::from(config.max_conversation_duration_seconds));
            self.max_deadline = Some(Instant::now() + cap);
        }
        let settings = build_settings(&config);
        self.agent_config = Some(config);
        self.handle.set_state(SessionState::Streaming);
        info!(model = %settings.agent.think.provider.model, "Agent transport ready. Streaming.");
        settings
    }

    async fn teardown(self, reason: CloseReason) {
        let Bridge {
            state,
            handle,
            mut session,
            mut telephony,
            mut agent,
            pending_agent,
            agent_config,
            started_at,
            ..
        } = self;
        drop(pending_agent);

        let dropped = session.close(reason);
        if dropped > 0 {
            debug!(bytes = dropped, "Discarded trailing partial frame");
        }
        if let Some(agent) = agent.as_mut() {
            agent.close().await;
        }
        telephony.close().await;

        let session_id = handle.id();
        drop(handle);
        if reason.is_failure() {
            warn!(%reason, "Session closed");
        } else {
            info!(%reason, "Session closed");
        }

        // Connections that never started a stream have nothing to report.
        let Some(info) = session.stream().cloned() else {
            return;
        };
        let ended_at = Utc::now();
        let conversation_history = match &agent_config {
            Some(config) if config.zero_pii_retention => Vec::new(),
            _ => session.take_transcript(),
        };
        let record = CallRecord {
            session_id: session_id.to_string(),
            agent_id: info.agent_id,
            stream_sid: Some(info.stream_sid),
            call_sid: info.call_sid,
            from_number: info.from_number,
            to_number: info.to_number,
            direction: "inbound".to_string(),
            status: if reason.is_failure() {
                CallStatus::Failed
            } else {
                CallStatus::Completed
            },
            end_reason: reason.to_string(),
            start_time: started_at,
            end_time: ended_at,
            call_duration_secs: (ended_at - started_at).num_milliseconds() as f64 / 1000.0,
            traffic: session.traffic(),
            conversation_history,
            callback_url: agent_config.and_then(|c| c.post_call_webhook_url),
        };
        if let Err(e) = state.call_records.record(record).await {
            warn!(error = ?e, "Failed to deliver call record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, registry::SessionRegistry, ws::agent::AgentConnector, ws::transport::pair};
    use anyhow::bail;
    use async_trait::async_trait;
    use base64::{Engine, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde_json::{Value, json};
    use tokio::{sync::mpsc, task::JoinHandle};
    use voiceagent_core::{
        call_record::CallRecordSink,
        store::{AgentStore, InMemoryAgentStore},
    };

    /// Hands the far end of every agent link to the test.
    struct FakeConnector {
        peers: mpsc::UnboundedSender<(String, Link)>,
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl AgentConnector for FakeConnector {
        async fn connect(&self, stream_sid: &str) -> Result<Link> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                bail!("connection refused");
            }
            let (ours, theirs) = pair("agent", "agent-peer");
            self.peers
                .send((stream_sid.to_string(), theirs))
                .map_err(|_| anyhow::anyhow!("test stopped listening for agent links"))?;
            Ok(ours)
        }
    }

    struct RecordingSink(mpsc::UnboundedSender<CallRecord>);

    #[async_trait]
    impl CallRecordSink for RecordingSink {
        async fn record(&self, record: CallRecord) -> Result<()> {
            self.0.send(record)?;
            Ok(())
        }
    }

    struct Harness {
        state: Arc<AppState>,
        agent_peers: mpsc::UnboundedReceiver<(String, Link)>,
        records: mpsc::UnboundedReceiver<CallRecord>,
    }

    /// Never answers a configuration lookup.
    struct HangingStore;

    #[async_trait]
    impl AgentStore for HangingStore {
        async fn agent_exists(&self, _agent_id: &str) -> Result<bool> {
            std::future::pending().await
        }

        async fn agent_configuration(&self, _agent_id: &str) -> Result<Option<AgentConfiguration>> {
            std::future::pending().await
        }
    }

    fn harness_with(
        configs: Vec<AgentConfiguration>,
        fail_connect: bool,
        tweak: impl FnOnce(&mut Config),
    ) -> Harness {
        let agents = Arc::new(InMemoryAgentStore::with_agents(configs));
        harness_from(agents, fail_connect, Duration::ZERO, tweak)
    }

    fn harness_from(
        agents: Arc<dyn AgentStore>,
        fail_connect: bool,
        connect_delay: Duration,
        tweak: impl FnOnce(&mut Config),
    ) -> Harness {
        let (peer_tx, agent_peers) = mpsc::unbounded_channel();
        let (record_tx, records) = mpsc::unbounded_channel();
        let mut config = Config::for_tests();
        tweak(&mut config);
        let state = Arc::new(AppState {
            config: Arc::new(config),
            agents,
            connector: Arc::new(FakeConnector {
                peers: peer_tx,
                fail: fail_connect,
                delay: connect_delay,
            }),
            call_records: Arc::new(RecordingSink(record_tx)),
            registry: SessionRegistry::new(),
        });
        Harness {
            state,
            agent_peers,
            records,
        }
    }

    fn harness() -> Harness {
        harness_with(vec![AgentConfiguration::for_agent("agent-1")], false, |_| {})
    }

    impl Harness {
        /// Starts a session and returns the telephony peer.
        fn spawn_session(&self) -> (Link, JoinHandle<()>) {
            let (bridge_side, phone) = pair("telephony", "phone");
            let handle = self.state.registry.accept();
            let task = tokio::spawn(run_session(self.state.clone(), handle, bridge_side));
            (phone, task)
        }

        async fn next_agent(&mut self) -> (String, Link) {
            timeout(Duration::from_secs(5), self.agent_peers.recv())
                .await
                .expect("timed out waiting for agent connection")
                .expect("connector dropped")
        }

        async fn next_record(&mut self) -> CallRecord {
            timeout(Duration::from_secs(5), self.records.recv())
                .await
                .expect("timed out waiting for call record")
                .expect("sink dropped")
        }
    }

    async fn recv(link: &mut Link) -> Option<WireMessage> {
        timeout(Duration::from_secs(5), link.next())
            .await
            .expect("timed out waiting for message")
            .map(|msg| msg.expect("link error"))
    }

    async fn send_text(link: &mut Link, value: Value) {
        link.send(WireMessage::Text(value.to_string())).await.unwrap();
    }

    fn start(stream_sid: &str, agent_id: &str) -> Value {
        json!({
            "event": "start",
            "start": {
                "streamSid": stream_sid,
                "callSid": "CA1",
                "customParameters": { "agent_id": agent_id, "from": "+15550001111" }
            }
        })
    }

    fn media(track: &str, audio: &[u8]) -> Value {
        json!({ "event": "media", "media": { "track": track, "payload": STANDARD.encode(audio) } })
    }

    fn binary(data: &[u8]) -> WireMessage {
        WireMessage::Binary(Bytes::copy_from_slice(data))
    }

    async fn expect_settings(agent: &mut Link) {
        let Some(WireMessage::Text(text)) = recv(agent).await else {
            panic!("expected settings first");
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "Settings");
    }

    async fn expect_closed(link: &mut Link) {
        assert_eq!(recv(link).await, Some(WireMessage::Close));
        assert_eq!(recv(link).await, None);
    }

    #[tokio::test]
    async fn test_handshake_precedes_audio_and_frames_are_exact() {
        let mut h = harness();
        let (mut phone, task) = h.spawn_session();

        send_text(&mut phone, start("MZ1", "agent-1")).await;
        // Sent before the agent link is necessarily up.
        send_text(&mut phone, media("inbound", &[1, 2, 3])).await;
        send_text(&mut phone, media("inbound", &[4, 5, 6, 7, 8, 9])).await;

        let (stream_sid, mut agent) = h.next_agent().await;
        assert_eq!(stream_sid, "MZ1");
        expect_settings(&mut agent).await;
        assert_eq!(recv(&mut agent).await, Some(binary(&[1, 2, 3, 4])));
        assert_eq!(recv(&mut agent).await, Some(binary(&[5, 6, 7, 8])));

        send_text(&mut phone, json!({ "event": "stop" })).await;
        // The trailing byte is never sent short.
        expect_closed(&mut agent).await;
        expect_closed(&mut phone).await;
        task.await.unwrap();

        let record = h.next_record().await;
        assert_eq!(record.status, CallStatus::Completed);
        assert_eq!(record.end_reason, "telephony stream stopped");
        assert_eq!(record.from_number.as_deref(), Some("+15550001111"));
        assert_eq!(record.traffic.frames_forwarded, 2);
        assert_eq!(record.traffic.inbound_bytes, 9);
        assert!(h.state.registry.is_empty());
    }

    #[tokio::test]
    async fn test_outbound_track_is_not_fed_back() {
        let mut h = harness();
        let (mut phone, _task) = h.spawn_session();
        send_text(&mut phone, start("MZ1", "agent-1")).await;
        let (_, mut agent) = h.next_agent().await;
        expect_settings(&mut agent).await;

        send_text(&mut phone, media("inbound", &[1; 4])).await;
        send_text(&mut phone, media("outbound", &[9; 4])).await;
        send_text(&mut phone, json!({ "event": "media", "media": { "payload": "CQkJCQ==" } })).await;
        send_text(&mut phone, media("inbound", &[2; 4])).await;

        assert_eq!(recv(&mut agent).await, Some(binary(&[1; 4])));
        assert_eq!(recv(&mut agent).await, Some(binary(&[2; 4])));
    }

    #[tokio::test]
    async fn test_agent_audio_and_barge_in_reach_telephony() {
        let mut h = harness();
        let (mut phone, _task) = h.spawn_session();
        send_text(&mut phone, start("MZ1", "agent-1")).await;
        let (_, mut agent) = h.next_agent().await;
        expect_settings(&mut agent).await;

        agent.send(binary(&[1, 2, 3])).await.unwrap();
        send_text(&mut agent, json!({ "type": "UserStartedSpeaking" })).await;

        let Some(WireMessage::Text(played)) = recv(&mut phone).await else {
            panic!("expected media");
        };
        assert_eq!(
            serde_json::from_str::<Value>(&played).unwrap(),
            json!({ "event": "media", "streamSid": "MZ1", "media": { "payload": "AQID" } })
        );
        let Some(WireMessage::Text(cleared)) = recv(&mut phone).await else {
            panic!("expected clear");
        };
        assert_eq!(
            serde_json::from_str::<Value>(&cleared).unwrap(),
            json!({ "event": "clear", "streamSid": "MZ1" })
        );
    }

    #[tokio::test]
    async fn test_telephony_close_closes_agent() {
        let mut h = harness();
        let (mut phone, task) = h.spawn_session();
        send_text(&mut phone, start("MZ1", "agent-1")).await;
        let (_, mut agent) = h.next_agent().await;
        expect_settings(&mut agent).await;

        phone.close().await;
        expect_closed(&mut agent).await;
        task.await.unwrap();

        let record = h.next_record().await;
        assert_eq!(record.end_reason, "telephony connection closed");
        assert!(h.state.registry.is_empty());
    }

    #[tokio::test]
    async fn test_agent_close_closes_telephony() {
        let mut h = harness();
        let (mut phone, task) = h.spawn_session();
        send_text(&mut phone, start("MZ1", "agent-1")).await;
        let (_, mut agent) = h.next_agent().await;
        expect_settings(&mut agent).await;

        agent.close().await;
        expect_closed(&mut phone).await;
        task.await.unwrap();

        let record = h.next_record().await;
        assert_eq!(record.status, CallStatus::Completed);
        assert_eq!(record.end_reason, "agent connection closed");
        assert!(h.state.registry.is_empty());
    }

    #[tokio::test]
    async fn test_agent_connect_failure_drops_call() {
        let mut h = harness_with(vec![AgentConfiguration::for_agent("agent-1")], true, |_| {});
        let (mut phone, task) = h.spawn_session();
        send_text(&mut phone, start("MZ1", "agent-1")).await;
        send_text(&mut phone, media("inbound", &[1; 8])).await;

        expect_closed(&mut phone).await;
        task.await.unwrap();

        let record = h.next_record().await;
        assert_eq!(record.status, CallStatus::Failed);
        assert_eq!(record.end_reason, "agent connection failed");
        assert_eq!(record.traffic.frames_forwarded, 0);
    }

    #[tokio::test]
    async fn test_unknown_agent_never_connects() {
        let mut h = harness();
        let (mut phone, task) = h.spawn_session();
        send_text(&mut phone, start("MZ1", "agent-404")).await;

        expect_closed(&mut phone).await;
        task.await.unwrap();
        assert!(h.agent_peers.try_recv().is_err());

        let record = h.next_record().await;
        assert_eq!(record.status, CallStatus::Failed);
        assert_eq!(record.end_reason, "unknown agent");
    }

    #[tokio::test]
    async fn test_malformed_messages_do_not_disturb_session() {
        let mut h = harness();
        let (mut phone, _task) = h.spawn_session();
        send_text(&mut phone, start("MZ1", "agent-1")).await;
        let (_, mut agent) = h.next_agent().await;
        expect_settings(&mut agent).await;

        send_text(&mut phone, media("inbound", &[1; 4])).await;
        phone
            .send(WireMessage::Text("not json".to_string()))
            .await
            .unwrap();
        send_text(&mut phone, json!({ "event": "media", "media": { "track": "inbound", "payload": "%%" } })).await;
        send_text(&mut phone, json!({ "event": "something-new" })).await;
        send_text(&mut phone, media("inbound", &[2; 4])).await;

        assert_eq!(recv(&mut agent).await, Some(binary(&[1; 4])));
        assert_eq!(recv(&mut agent).await, Some(binary(&[2; 4])));

        agent
            .send(WireMessage::Text("{ broken".to_string()))
            .await
            .unwrap();
        send_text(&mut agent, json!({ "type": "UserStartedSpeaking" })).await;
        let Some(WireMessage::Text(cleared)) = recv(&mut phone).await else {
            panic!("expected clear");
        };
        assert!(cleared.contains("\"clear\""));
    }

    #[tokio::test]
    async fn test_concurrent_sessions_are_isolated() {
        const SESSIONS: u8 = 8;
        let configs = (0..SESSIONS)
            .map(|i| AgentConfiguration::for_agent(format!("agent-{i}")))
            .collect();
        let mut h = harness_with(configs, false, |_| {});

        let mut phones = Vec::new();
        for i in 0..SESSIONS {
            let (mut phone, _task) = h.spawn_session();
            send_text(&mut phone, start(&format!("MZ{i}"), &format!("agent-{i}"))).await;
            for chunk in 0..3u8 {
                send_text(&mut phone, media("inbound", &[i, chunk, i, chunk])).await;
            }
            phones.push(phone);
        }

        for _ in 0..SESSIONS {
            let (stream_sid, mut agent) = h.next_agent().await;
            let i: u8 = stream_sid.trim_start_matches("MZ").parse().unwrap();
            expect_settings(&mut agent).await;
            for chunk in 0..3u8 {
                assert_eq!(recv(&mut agent).await, Some(binary(&[i, chunk, i, chunk])));
            }
        }
        assert_eq!(h.state.registry.len(), SESSIONS as usize);
    }

    #[tokio::test]
    async fn test_transcript_respects_zero_pii_retention() {
        let mut private = AgentConfiguration::for_agent("private");
        private.zero_pii_retention = true;
        private.post_call_webhook_url = Some("https://hooks.example.com/calls".to_string());
        let mut h = harness_with(
            vec![AgentConfiguration::for_agent("agent-1"), private],
            false,
            |_| {},
        );

        for agent_id in ["agent-1", "private"] {
            let (mut phone, task) = h.spawn_session();
            send_text(&mut phone, start("MZ1", agent_id)).await;
            let (_, mut agent) = h.next_agent().await;
            expect_settings(&mut agent).await;
            send_text(
                &mut agent,
                json!({ "type": "ConversationText", "role": "user", "content": "my number is 555" }),
            )
            .await;
            // Agent messages are handled in order, so playback proves the text landed.
            agent.send(binary(&[7])).await.unwrap();
            assert!(matches!(recv(&mut phone).await, Some(WireMessage::Text(_))));
            send_text(&mut phone, json!({ "event": "stop" })).await;
            task.await.unwrap();
        }

        let public = h.next_record().await;
        assert_eq!(public.conversation_history.len(), 1);
        assert_eq!(public.callback_url, None);

        let private = h.next_record().await;
        assert!(private.conversation_history.is_empty());
        assert_eq!(
            private.callback_url.as_deref(),
            Some("https://hooks.example.com/calls")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_duration_ends_call() {
        let mut capped = AgentConfiguration::for_agent("agent-1");
        capped.max_conversation_duration_seconds = 1;
        let mut h = harness_with(vec![capped], false, |_| {});
        let (mut phone, task) = h.spawn_session();
        send_text(&mut phone, start("MZ1", "agent-1")).await;
        let (_, mut agent) = h.next_agent().await;
        expect_settings(&mut agent).await;

        expect_closed(&mut agent).await;
        expect_closed(&mut phone).await;
        task.await.unwrap();
        assert_eq!(h.next_record().await.end_reason, "maximum call duration reached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_telephony_times_out() {
        let mut h = harness_with(vec![AgentConfiguration::for_agent("agent-1")], false, |c| {
            c.session_idle_timeout = Some(Duration::from_secs(2));
        });
        let (mut phone, task) = h.spawn_session();
        send_text(&mut phone, start("MZ1", "agent-1")).await;
        let (_, mut agent) = h.next_agent().await;
        expect_settings(&mut agent).await;

        expect_closed(&mut phone).await;
        task.await.unwrap();
        let record = h.next_record().await;
        assert_eq!(record.end_reason, "idle timeout");
        assert_eq!(record.status, CallStatus::Completed);
    }

    #[tokio::test]
    async fn test_connection_without_start_leaves_no_record() {
        let mut h = harness();
        let (mut phone, task) = h.spawn_session();
        send_text(&mut phone, json!({ "event": "connected", "protocol": "Call" })).await;
        phone.close().await;
        task.await.unwrap();

        assert!(h.records.try_recv().is_err());
        assert!(h.state.registry.is_empty());
    }

    fn slow_agent_harness(connect_delay: Duration, tweak: impl FnOnce(&mut Config)) -> Harness {
        let agents = Arc::new(InMemoryAgentStore::with_agents([AgentConfiguration::for_agent(
            "agent-1",
        )]));
        harness_from(agents, false, connect_delay, tweak)
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_connecting_abandons_agent() {
        let connect_delay = Duration::from_secs(60);
        let mut h = slow_agent_harness(connect_delay, |c| {
            c.agent_connect_timeout = connect_delay * 2;
        });
        let began = Instant::now();
        let (mut phone, task) = h.spawn_session();
        send_text(&mut phone, start("MZ1", "agent-1")).await;
        send_text(&mut phone, media("inbound", &[1; 8])).await;
        send_text(&mut phone, json!({ "event": "stop" })).await;

        expect_closed(&mut phone).await;
        task.await.unwrap();
        assert!(began.elapsed() < connect_delay);
        assert!(h.agent_peers.try_recv().is_err());

        let record = h.next_record().await;
        assert_eq!(record.end_reason, "telephony stream stopped");
        assert_eq!(record.traffic.frames_forwarded, 0);
        assert!(h.state.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hangup_while_connecting_abandons_agent() {
        let connect_delay = Duration::from_secs(60);
        let mut h = slow_agent_harness(connect_delay, |c| {
            c.agent_connect_timeout = connect_delay * 2;
        });
        let began = Instant::now();
        let (mut phone, task) = h.spawn_session();
        send_text(&mut phone, start("MZ1", "agent-1")).await;
        phone.close().await;

        task.await.unwrap();
        assert!(began.elapsed() < connect_delay);
        assert!(h.agent_peers.try_recv().is_err());
        assert_eq!(h.next_record().await.end_reason, "telephony connection closed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_configuration_lookup_is_bounded() {
        let mut h = harness_from(Arc::new(HangingStore), false, Duration::ZERO, |_| {});
        let (mut phone, task) = h.spawn_session();
        send_text(&mut phone, start("MZ1", "agent-1")).await;

        expect_closed(&mut phone).await;
        task.await.unwrap();
        assert!(h.agent_peers.try_recv().is_err());

        let record = h.next_record().await;
        assert_eq!(record.status, CallStatus::Failed);
        assert_eq!(record.end_reason, "configuration lookup failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_allowance_starts_when_agent_is_ready() {
        let idle = Duration::from_secs(2);
        let mut h = slow_agent_harness(Duration::from_millis(1500), |c| {
            c.session_idle_timeout = Some(idle);
        });
        let (mut phone, task) = h.spawn_session();
        send_text(&mut phone, start("MZ1", "agent-1")).await;
        let (_, mut agent) = h.next_agent().await;
        let ready_at = Instant::now();
        expect_settings(&mut agent).await;

        expect_closed(&mut phone).await;
        task.await.unwrap();
        assert!(ready_at.elapsed() >= idle);
        assert_eq!(h.next_record().await.end_reason, "idle timeout");
    }
}
