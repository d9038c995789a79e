/*!
Sans-IO session for the PQ-DTLS protocol.

A `Session` owns one peer's handshake, record layer and rekey schedule. It
never touches a socket or a clock: callers feed it datagrams and the current
time, then drain outgoing datagrams with [`Session::poll_transmit`] and
notifications with [`Session::poll_event`]. [`Session::next_timeout`] says
when [`Session::handle_timeout`] must be called next.

Recoverable record failures (bad tags, replays, malformed framing) drop the
record and count against a budget; fatal errors send an alert, wipe keys and
close the session.
*/

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use crate::core::{
    constants::{defaults, HANDSHAKE_RECORD_OVERHEAD},
    context::Context,
    crypto::registry::CipherSuite,
    error::{Error, ErrorKind, Result},
    message::{
        handshake::{fragment_message, parse_fragments},
        record::{OwnedRecord, Record, Records},
        types::{Alert, AlertDescription, AlertLevel, ContentType},
    },
    record::{Opened, RecordKeys, RecordLayer},
    security::rotation::{RekeyParams, RekeyScheduler, SessionStats},
    session::{
        handshake::{FlightItem, HandshakeEngine, HandshakeOutput, Received},
        params::{KeyBlock, NegotiatedParameters, SecurityParameters},
        state::{ConnectionState, Role, StateManager},
    },
};
use crate::{config_err, invalid_state_err, malformed_err};

/// Notification surfaced to the owner of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake completed
    Connected,
    /// A complete application message arrived
    Data(Vec<u8>),
    /// The session moved to a new key epoch
    Rekeyed(u16),
    /// A fatal error ended the session
    Error(ErrorKind),
    /// The session is closed; emitted once
    Closed,
}

/// A datagram ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    pub destination: SocketAddr,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct RetransmitTimer {
    at: Instant,
    interval: Duration,
}

/// One secure session with a single peer
pub struct Session {
    context: Arc<Context>,
    peer: SocketAddr,
    state: StateManager,
    handshake: Option<HandshakeEngine>,
    record: RecordLayer,
    negotiated: Option<NegotiatedParameters>,
    secrets: Option<SecurityParameters>,
    rekey: RekeyScheduler,
    handshake_deadline: Option<Instant>,
    retransmit: Option<RetransmitTimer>,
    last_flight: Vec<FlightItem>,
    resend_requested: bool,
    buffered: VecDeque<OwnedRecord>,
    failures: u32,
    malformed: u32,
    transmits: VecDeque<Transmit>,
    events: VecDeque<SessionEvent>,
    closed_emitted: bool,
    error: Option<Error>,
}

impl Session {
    /// Create a session with `peer`; the role comes from the context
    pub fn new(context: Arc<Context>, peer: SocketAddr, now: Instant) -> Self {
        let config = context.config();
        let params = RekeyParams { interval: config.rekey_interval, data_limit: config.rekey_data_limit };
        let role = context.role();
        let version = context.max_version().wire();

        Self {
            state: StateManager::new(role),
            handshake: None,
            record: RecordLayer::new(version),
            negotiated: None,
            secrets: None,
            rekey: RekeyScheduler::new(params, now),
            handshake_deadline: None,
            retransmit: None,
            last_flight: Vec::new(),
            resend_requested: false,
            buffered: VecDeque::new(),
            failures: 0,
            malformed: 0,
            transmits: VecDeque::new(),
            events: VecDeque::new(),
            closed_emitted: false,
            error: None,
            context,
            peer,
        }
    }

    pub fn role(&self) -> Role {
        self.state.role()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state.can_transfer_data()
    }

    /// Whether the session is finished and emitted `Closed`
    pub fn is_closed(&self) -> bool {
        self.closed_emitted
    }

    /// Current write epoch
    pub fn epoch(&self) -> u16 {
        self.record.write_epoch()
    }

    /// Parameters agreed in the handshake, once connected
    pub fn negotiated(&self) -> Option<&NegotiatedParameters> {
        self.negotiated.as_ref()
    }

    pub fn stats(&self) -> &SessionStats {
        self.rekey.stats()
    }

    /// The fatal error that ended the session, if any
    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    /// Begin the handshake
    ///
    /// A client queues its ClientHello; a server starts waiting for one.
    pub fn start(&mut self, now: Instant) -> Result<()> {
        if !self.state.can_start() {
            return invalid_state_err!(ConnectionState::Closed, self.state.state());
        }

        self.state.transition_to_connecting();
        self.handshake_deadline = Some(now + self.context.config().handshake_timeout);

        let mut engine = HandshakeEngine::new(Arc::clone(&self.context));
        let output = engine.start()?;
        self.handshake = Some(engine);
        debug!(role = %self.role(), peer = %self.peer, "handshake started");

        if let Err(err) = self.apply_handshake_output(output, now) {
            self.fail(err);
        }
        Ok(())
    }

    /// Process one received datagram
    pub fn handle_datagram(&mut self, datagram: &[u8], now: Instant) {
        if self.closed_emitted {
            trace!(peer = %self.peer, "dropping datagram for closed session");
            return;
        }

        for record in Records::new(datagram) {
            let result = record.and_then(|record| self.process_record(&record, now));
            if let Err(err) = result {
                self.on_error(err);
            }
            if self.closed_emitted {
                return;
            }
        }

        if std::mem::take(&mut self.resend_requested) {
            debug!(peer = %self.peer, "peer repeated a flight; resending ours");
            if let Err(err) = self.send_flight() {
                self.fail(err);
            }
        }
    }

    /// Fire whatever timers are due at `now`
    pub fn handle_timeout(&mut self, now: Instant) {
        if self.closed_emitted {
            return;
        }

        if self.handshake_deadline.is_some_and(|deadline| now >= deadline) {
            let timeout = self.context.config().handshake_timeout;
            self.fail(Error::HandshakeTimeout(timeout.as_millis() as u64));
            return;
        }

        if let Some(timer) = self.retransmit {
            if now >= timer.at {
                let interval = (timer.interval * 2).min(defaults::MAX_RETRANSMIT_INTERVAL);
                debug!(peer = %self.peer, ?interval, "retransmitting flight");
                if let Err(err) = self.send_flight() {
                    self.fail(err);
                    return;
                }
                self.retransmit = Some(RetransmitTimer { at: now + interval, interval });
            }
        }

        self.rekey_tick(now);
    }

    /// Earliest instant at which `handle_timeout` has work to do
    pub fn next_timeout(&self) -> Option<Instant> {
        if self.closed_emitted {
            return None;
        }
        let rekey = if self.is_connected() { self.rekey.next_tick() } else { None };
        [self.handshake_deadline, self.retransmit.map(|t| t.at), rekey]
            .into_iter()
            .flatten()
            .min()
    }

    /// Encrypt and queue an application message
    pub fn send_application_data(&mut self, payload: &[u8], now: Instant) -> Result<()> {
        self.require_connected()?;

        if self.rekey.data_limit_reached() {
            debug!(peer = %self.peer, "data limit reached; rekeying before send");
            self.rekey(now)?;
        }

        let mtu = self.context.mtu();
        let frames = self.record.frame_application_data(payload, mtu)?;
        let mut records = Vec::with_capacity(frames.len());
        for frame in &frames {
            let mut out = Vec::new();
            self.record.write_record(ContentType::ApplicationData, frame, &mut out)?;
            records.push(out);
        }
        self.queue_records(records);
        self.rekey.track_sent(payload.len(), now);
        trace!(peer = %self.peer, bytes = payload.len(), fragments = frames.len(), "queued application data");
        Ok(())
    }

    /// Move to the next key epoch now
    pub fn rekey(&mut self, now: Instant) -> Result<()> {
        self.require_connected()?;

        let epoch = self
            .record
            .write_epoch()
            .checked_add(1)
            .ok_or_else(|| Error::Internal("epoch space exhausted".into()))?;
        let suite = self.suite()?;
        let block = self.epoch_keys(epoch, suite)?;
        let role = self.role();

        self.record
            .install_write_keys(epoch, RecordKeys::from_direction(suite.symmetric, block.local(role))?)?;
        self.record
            .install_read_keys(epoch, RecordKeys::from_direction(suite.symmetric, block.remote(role))?);
        self.rekey.complete_rotation(now);

        info!(peer = %self.peer, epoch, "session rekeyed");
        self.events.push_back(SessionEvent::Rekeyed(epoch));
        Ok(())
    }

    /// Rekey every `interval` while traffic is flowing
    pub fn setup_automatic_rekey(&mut self, interval: Duration, now: Instant) -> Result<()> {
        if interval.is_zero() {
            return config_err!("rekey interval must be positive");
        }
        self.rekey.arm(interval, now);
        Ok(())
    }

    /// Periodic rekey check
    pub fn rekey_tick(&mut self, now: Instant) {
        if !self.is_connected() || !self.rekey.on_tick(now) {
            return;
        }
        if let Err(err) = self.rekey(now) {
            self.fail(err);
        }
    }

    /// Close the session
    ///
    /// Sends close_notify when connected, wipes keys and emits `Closed`.
    /// Calling it again has no effect.
    pub fn close(&mut self) {
        if self.closed_emitted {
            return;
        }
        if self.is_connected() {
            self.send_alert(Alert::close_notify());
        }
        info!(peer = %self.peer, "session closed");
        self.state.transition_to_closed();
        self.teardown();
    }

    /// Next datagram to send
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }

    /// Next event for the owner
    pub fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    fn require_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else if self.closed_emitted {
            Err(Error::SessionClosed)
        } else {
            invalid_state_err!(ConnectionState::Connected, self.state.state())
        }
    }

    fn suite(&self) -> Result<CipherSuite> {
        self.negotiated
            .as_ref()
            .map(|params| params.cipher_suite)
            .or_else(|| self.handshake.as_ref().and_then(|engine| engine.cipher_suite()))
            .ok_or_else(|| Error::Internal("cipher suite not negotiated".into()))
    }

    fn epoch_keys(&self, epoch: u16, suite: CipherSuite) -> Result<KeyBlock> {
        let secrets = self.secrets.as_ref().ok_or(Error::SessionClosed)?;
        secrets.rekey_block(epoch, suite.key_material())
    }

    fn install_epoch(&mut self, epoch: u16, block: &KeyBlock, suite: CipherSuite) -> Result<()> {
        let role = self.role();
        self.record
            .install_write_keys(epoch, RecordKeys::from_direction(suite.symmetric, block.local(role))?)?;
        self.record
            .install_read_keys(epoch, RecordKeys::from_direction(suite.symmetric, block.remote(role))?);
        Ok(())
    }

    fn process_record(&mut self, record: &Record<'_>, now: Instant) -> Result<()> {
        let header = record.header;

        if header.content_type == ContentType::ApplicationData && !self.is_connected() {
            if self.state.is_state(ConnectionState::Connecting) {
                self.buffer_record(record);
            }
            return Ok(());
        }

        // Once keys are agreed only handshake and ChangeCipherSpec
        // retransmits may still arrive unprotected
        if header.epoch == 0 && header.content_type == ContentType::Alert && self.negotiated.is_some() {
            return malformed_err!("unprotected alert after handshake");
        }

        match self.record.read_record(record)? {
            Opened::Plaintext(plaintext) => self.dispatch(header.content_type, header.epoch, &plaintext, now),
            Opened::FutureEpoch(_) if self.is_connected() => self.follow_peer(record, now),
            Opened::FutureEpoch(epoch) => {
                trace!(epoch, "holding record until keys are ready");
                self.buffer_record(record);
                Ok(())
            }
            Opened::StaleEpoch(epoch) => {
                debug!(epoch, "dropping record from a retired epoch");
                Ok(())
            }
        }
    }

    /// Catch up with a peer that moved to a later epoch
    fn follow_peer(&mut self, record: &Record<'_>, now: Instant) -> Result<()> {
        let epoch = record.header.epoch;
        let current = self.record.read_epoch();
        if epoch > current.saturating_add(defaults::MAX_EPOCH_CATCH_UP) {
            return malformed_err!("epoch {} too far ahead of {}", epoch, current);
        }

        let suite = self.suite()?;
        let block = self.epoch_keys(epoch, suite)?;
        let role = self.role();
        let read_keys = RecordKeys::from_direction(suite.symmetric, block.remote(role))?;
        let plaintext = self.record.read_record_with(record, read_keys)?;

        if self.record.write_epoch() < epoch {
            self.record
                .install_write_keys(epoch, RecordKeys::from_direction(suite.symmetric, block.local(role))?)?;
        }
        self.rekey.note_peer_rekey(now);
        info!(peer = %self.peer, epoch, "followed peer to new epoch");
        self.events.push_back(SessionEvent::Rekeyed(epoch));

        self.dispatch(record.header.content_type, epoch, &plaintext, now)
    }

    fn buffer_record(&mut self, record: &Record<'_>) {
        if self.buffered.len() >= defaults::MAX_BUFFERED_RECORDS {
            warn!(peer = %self.peer, "record buffer full; dropping oldest");
            self.buffered.pop_front();
        }
        self.buffered.push_back(record.to_owned_record());
    }

    fn drain_buffered(&mut self, now: Instant) {
        let held = std::mem::take(&mut self.buffered);
        for owned in held {
            if let Err(err) = self.process_record(&owned.as_record(), now) {
                self.on_error(err);
            }
            if self.closed_emitted {
                return;
            }
        }
    }

    fn dispatch(&mut self, content_type: ContentType, epoch: u16, plaintext: &[u8], now: Instant) -> Result<()> {
        match content_type {
            ContentType::Handshake => self.on_handshake(epoch, plaintext, now),
            ContentType::ChangeCipherSpec => {
                if plaintext != [1] {
                    return malformed_err!("invalid ChangeCipherSpec");
                }
                Ok(())
            }
            ContentType::Alert => self.on_alert(plaintext),
            ContentType::ApplicationData => {
                if let Some(message) = self.record.accept_application_fragment(plaintext)? {
                    self.rekey.track_received(message.len(), now);
                    self.events.push_back(SessionEvent::Data(message));
                }
                Ok(())
            }
        }
    }

    fn on_handshake(&mut self, epoch: u16, payload: &[u8], now: Instant) -> Result<()> {
        let fragments = parse_fragments(payload)?;

        let Some(engine) = self.handshake.as_mut() else {
            // Peer is still waiting for our final flight
            if !self.last_flight.is_empty() {
                self.resend_requested = true;
            }
            return Ok(());
        };

        let mut output = HandshakeOutput::default();
        let mut duplicate = false;
        for (header, body) in fragments {
            match engine.receive_fragment(epoch, &header, body)? {
                Received::Duplicate => duplicate = true,
                Received::Buffered => {}
                Received::Processed(processed) => output.merge(processed),
            }
        }

        if duplicate && output.flight.is_none() && !self.last_flight.is_empty() {
            self.resend_requested = true;
        }
        self.apply_handshake_output(output, now)
    }

    fn apply_handshake_output(&mut self, output: HandshakeOutput, now: Instant) -> Result<()> {
        let keys_installed = output.keys.is_some();
        if let Some(block) = output.keys {
            let engine = self
                .handshake
                .as_ref()
                .ok_or_else(|| Error::Internal("handshake state missing".into()))?;
            let suite = engine
                .cipher_suite()
                .ok_or_else(|| Error::Internal("cipher suite not negotiated".into()))?;
            if let Some(version) = engine.version() {
                self.record.set_version(version.wire());
            }
            self.install_epoch(1, &block, suite)?;
            debug!(peer = %self.peer, %suite, "installed epoch 1 keys");
        }

        if output.progress {
            self.retransmit = None;
        }

        if let Some(flight) = output.flight {
            self.last_flight = flight;
            self.resend_requested = false;
            self.send_flight()?;
            if !output.completed {
                let interval = self.context.config().retransmit_interval;
                self.retransmit = Some(RetransmitTimer { at: now + interval, interval });
            }
        }

        if output.completed {
            self.complete_handshake(now)?;
        }

        if keys_installed || output.completed {
            self.drain_buffered(now);
        }
        Ok(())
    }

    fn complete_handshake(&mut self, now: Instant) -> Result<()> {
        let mut engine = self
            .handshake
            .take()
            .ok_or_else(|| Error::Internal("handshake state missing".into()))?;
        let (params, secrets) = engine.finish()?;

        info!(
            role = %self.role(),
            peer = %self.peer,
            version = %params.version,
            suite = %params.cipher_suite,
            "handshake complete"
        );

        self.negotiated = Some(params);
        self.secrets = Some(secrets);
        self.handshake_deadline = None;
        self.retransmit = None;
        if self.role() == Role::Client {
            // Only the server answers repeated flights after completion
            self.last_flight.clear();
        }

        let mut scheduler = RekeyScheduler::new(*self.rekey.params(), now);
        if let Some(interval) = self.rekey.params().interval {
            scheduler.arm(interval, now);
        }
        self.rekey = scheduler;

        self.state.transition_to_connected();
        self.events.push_back(SessionEvent::Connected);
        Ok(())
    }

    fn on_alert(&mut self, payload: &[u8]) -> Result<()> {
        let Some(alert) = Alert::from_bytes(payload) else {
            return malformed_err!("alert truncated");
        };

        if alert.description == AlertDescription::CloseNotify {
            info!(peer = %self.peer, "peer closed the session");
            self.state.transition_to_disconnected();
            self.teardown();
            return Ok(());
        }

        match alert.level {
            AlertLevel::Fatal => Err(Error::FatalAlert(alert.description)),
            AlertLevel::Warning => {
                debug!(peer = %self.peer, description = ?alert.description, "ignoring warning alert");
                Ok(())
            }
        }
    }

    /// Encode the last flight into datagrams and queue them
    fn send_flight(&mut self) -> Result<()> {
        let mtu = self.context.mtu();
        let budget = mtu.saturating_sub(HANDSHAKE_RECORD_OVERHEAD).max(1);
        let mut records = Vec::new();

        for item in &self.last_flight {
            match item {
                FlightItem::Handshake { epoch, message } => {
                    if self.record.next_sequence(*epoch).is_none() {
                        trace!(epoch, "epoch retired; skipping flight message");
                        continue;
                    }
                    for fragment in fragment_message(message, budget)? {
                        let mut out = Vec::new();
                        self.record.write_record_at(*epoch, ContentType::Handshake, &fragment, &mut out)?;
                        records.push(out);
                    }
                }
                FlightItem::ChangeCipherSpec => {
                    if self.record.next_sequence(0).is_none() {
                        continue;
                    }
                    let mut out = Vec::new();
                    self.record.write_record_at(0, ContentType::ChangeCipherSpec, &[1], &mut out)?;
                    records.push(out);
                }
            }
        }

        self.queue_records(records);
        Ok(())
    }

    fn queue_records(&mut self, records: Vec<Vec<u8>>) {
        for payload in pack_datagrams(records, self.context.mtu()) {
            self.transmits.push_back(Transmit { destination: self.peer, payload });
        }
    }

    fn send_alert(&mut self, alert: Alert) {
        let mut out = Vec::new();
        match self.record.write_record(ContentType::Alert, &alert.to_bytes(), &mut out) {
            Ok(()) => self.transmits.push_back(Transmit { destination: self.peer, payload: out }),
            Err(err) => debug!(peer = %self.peer, error = %err, "could not send alert"),
        }
    }

    fn on_error(&mut self, err: Error) {
        if err.is_recoverable() {
            let handshake_framing = matches!(err, Error::MalformedRecord(_)) && self.handshake.is_some();
            let (count, budget) = if handshake_framing {
                self.malformed += 1;
                (self.malformed, self.context.config().malformed_handshake_budget)
            } else {
                self.failures += 1;
                (self.failures, self.context.config().failure_budget)
            };
            warn!(peer = %self.peer, error = %err, count, "dropping record");
            if count > budget {
                self.fail(Error::FailureBudgetExceeded(count));
            }
        } else if err.is_fatal() {
            self.fail(err);
        } else {
            warn!(peer = %self.peer, error = %err, "ignoring error");
        }
    }

    fn fail(&mut self, err: Error) {
        if self.closed_emitted {
            return;
        }
        error!(role = %self.role(), peer = %self.peer, error = %err, "session failed");
        if !matches!(err, Error::FatalAlert(_)) {
            self.send_alert(Alert::fatal(err.alert_description()));
        }
        self.events.push_back(SessionEvent::Error(err.kind()));
        self.state.transition_to_error();
        self.teardown();
        self.error = Some(err);
    }

    fn teardown(&mut self) {
        self.record.clear_keys();
        self.secrets = None;
        self.handshake = None;
        self.last_flight.clear();
        self.resend_requested = false;
        self.buffered.clear();
        self.retransmit = None;
        self.handshake_deadline = None;
        self.rekey.disarm();
        if !self.closed_emitted {
            self.closed_emitted = true;
            self.events.push_back(SessionEvent::Closed);
        }
    }
}

/// Pack encoded records into as few datagrams as fit under `mtu`
fn pack_datagrams(records: Vec<Vec<u8>>, mtu: usize) -> Vec<Vec<u8>> {
    let mut datagrams = Vec::new();
    let mut current: Vec<u8> = Vec::new();
    for record in records {
        if !current.is_empty() && current.len() + record.len() > mtu {
            datagrams.push(std::mem::take(&mut current));
        }
        current.extend_from_slice(&record);
    }
    if !current.is_empty() {
        datagrams.push(current);
    }
    datagrams
}
