/*!
Handshake state machine for the PQ-DTLS protocol.

```text
Client                                   Server
ClientHello(0)          -------->
                                         ServerHello(0)
                                         Certificate(1)
                        <--------        ServerKeyExchange(2)
Certificate(1)
ClientKeyExchange(2)
[ChangeCipherSpec]
Finished(3)             -------->
                                         [ChangeCipherSpec]
                        <--------        Finished(3)
```

The engine consumes handshake fragments, reassembles them, processes
complete messages strictly in `message_seq` order and emits the next flight.
It knows nothing about records, sockets or clocks.
*/

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::{
    constants::{defaults, labels, sizes::RANDOM_SIZE},
    context::Context,
    crypto::{
        config::ProtocolVersion,
        kdf,
        key_exchange::{KeyExchange, KeyPair},
        registry::{CipherSuite, CipherSuiteRegistry},
    },
    error::{Error, Result},
    message::{
        handshake::{
            Certificate, ClientHello, ClientKeyExchange, Finished, HandshakeHeader, HandshakeMessage,
            Reassembler, ServerHello, ServerKeyExchange,
        },
        types::HandshakeType,
    },
    security::constant_time::constant_time_eq,
    session::{
        params::{KeyBlock, NegotiatedParameters, SecurityParameters},
        state::Role,
    },
};
use crate::malformed_err;

/// One item of an outgoing flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlightItem {
    /// Handshake message sent at the given epoch
    Handshake { epoch: u16, message: HandshakeMessage },
    /// ChangeCipherSpec marker, sent in the clear
    ChangeCipherSpec,
}

/// What processing a batch of handshake messages produced
#[derive(Debug, Default)]
pub struct HandshakeOutput {
    /// A new flight to send; replaces any earlier flight for retransmission
    pub flight: Option<Vec<FlightItem>>,
    /// Keys for epoch 1, ready to install
    pub keys: Option<KeyBlock>,
    /// The peer moved the handshake forward
    pub progress: bool,
    /// The peer's Finished verified; the handshake is complete
    pub completed: bool,
}

impl HandshakeOutput {
    pub(crate) fn merge(&mut self, other: HandshakeOutput) {
        if other.flight.is_some() {
            self.flight = other.flight;
        }
        if other.keys.is_some() {
            self.keys = other.keys;
        }
        self.progress |= other.progress;
        self.completed |= other.completed;
    }
}

/// Outcome of feeding one fragment
#[derive(Debug)]
pub enum Received {
    /// Fragment of a message already processed
    Duplicate,
    /// Held until earlier fragments or messages arrive
    Buffered,
    /// One or more messages were processed
    Processed(HandshakeOutput),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    Start,
    WaitServerHello,
    WaitServerCertificate,
    WaitServerKeyExchange,
    WaitServerFinished,
    WaitClientHello,
    WaitClientCertificate,
    WaitClientKeyExchange,
    WaitClientFinished,
    Complete,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Drives the handshake for one session
pub struct HandshakeEngine {
    context: Arc<Context>,
    role: Role,
    state: HandshakeState,
    send_seq: u16,
    recv_seq: u16,
    reassembler: Reassembler,
    early: BTreeMap<u16, HandshakeMessage>,
    transcript: Vec<u8>,
    client_random: [u8; RANDOM_SIZE],
    server_random: [u8; RANDOM_SIZE],
    session_id: Vec<u8>,
    offered_versions: Vec<ProtocolVersion>,
    version: Option<ProtocolVersion>,
    suite: Option<CipherSuite>,
    kem_keypair: Option<KeyPair>,
    peer_certificate: Vec<u8>,
    security: Option<SecurityParameters>,
    key_block: Option<KeyBlock>,
}

impl HandshakeEngine {
    pub fn new(context: Arc<Context>) -> Self {
        let role = context.role();
        Self {
            context,
            role,
            state: HandshakeState::Start,
            send_seq: 0,
            recv_seq: 0,
            reassembler: Reassembler::default(),
            early: BTreeMap::new(),
            transcript: Vec::new(),
            client_random: [0u8; RANDOM_SIZE],
            server_random: [0u8; RANDOM_SIZE],
            session_id: Vec::new(),
            offered_versions: Vec::new(),
            version: None,
            suite: None,
            kem_keypair: None,
            peer_certificate: Vec::new(),
            security: None,
            key_block: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Suite selected so far, if any
    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.suite
    }

    /// Version selected so far, if any
    pub fn version(&self) -> Option<ProtocolVersion> {
        self.version
    }

    /// Begin the handshake; a client emits its ClientHello
    pub fn start(&mut self) -> Result<HandshakeOutput> {
        if self.state != HandshakeState::Start {
            return Err(Error::Internal("handshake already started".into()));
        }

        match self.role {
            Role::Server => {
                self.state = HandshakeState::WaitClientHello;
                Ok(HandshakeOutput::default())
            }
            Role::Client => {
                self.client_random = rand::random();
                self.offered_versions = self.context.versions().to_vec();

                let hello = ClientHello {
                    versions: self.offered_versions.iter().map(|v| v.wire()).collect(),
                    random: self.client_random,
                    session_id: Vec::new(),
                    cipher_suites: self.context.cipher_suites().iter().map(|s| s.code).collect(),
                };
                let message = self.next_message(HandshakeType::ClientHello, hello.encode());
                self.state = HandshakeState::WaitServerHello;
                debug!(versions = ?self.offered_versions, "sending ClientHello");

                Ok(HandshakeOutput {
                    flight: Some(vec![FlightItem::Handshake { epoch: 0, message }]),
                    ..Default::default()
                })
            }
        }
    }

    /// Feed one handshake fragment received at `epoch`
    pub fn receive_fragment(&mut self, epoch: u16, header: &HandshakeHeader, body: &[u8]) -> Result<Received> {
        let seq = header.message_seq;
        if seq < self.recv_seq || self.state == HandshakeState::Complete {
            return Ok(Received::Duplicate);
        }
        if (seq - self.recv_seq) as usize >= defaults::MAX_BUFFERED_HANDSHAKE_MESSAGES {
            return malformed_err!("handshake message {} too far ahead of {}", seq, self.recv_seq);
        }
        if header.msg_type == HandshakeType::Finished && epoch == 0 {
            return malformed_err!("unprotected Finished");
        }

        let Some(message) = self.reassembler.insert(header, body)? else {
            return Ok(Received::Buffered);
        };

        if message.message_seq != self.recv_seq {
            debug!(seq = message.message_seq, expected = self.recv_seq, "holding early handshake message");
            self.early.insert(message.message_seq, message);
            return Ok(Received::Buffered);
        }

        let mut output = self.process(message)?;
        while let Some(next) = self.early.remove(&self.recv_seq) {
            output.merge(self.process(next)?);
        }
        Ok(Received::Processed(output))
    }

    /// Take the negotiated snapshot and secrets once the handshake completes
    pub fn finish(&mut self) -> Result<(NegotiatedParameters, SecurityParameters)> {
        if self.state != HandshakeState::Complete {
            return Err(Error::InvalidState {
                expected: HandshakeState::Complete.to_string(),
                actual: self.state.to_string(),
            });
        }
        let (Some(version), Some(cipher_suite), Some(security)) =
            (self.version, self.suite, self.security.take())
        else {
            return Err(Error::Internal("handshake completed without parameters".into()));
        };
        self.key_block = None;
        self.transcript.clear();

        let params = NegotiatedParameters {
            version,
            cipher_suite,
            client_random: self.client_random,
            server_random: self.server_random,
            session_id: self.session_id.clone(),
            peer_certificate: std::mem::take(&mut self.peer_certificate),
        };
        Ok((params, security))
    }

    fn next_message(&mut self, msg_type: HandshakeType, body: Vec<u8>) -> HandshakeMessage {
        let message = HandshakeMessage::new(msg_type, self.send_seq, body);
        self.send_seq = self.send_seq.wrapping_add(1);
        self.transcript.extend_from_slice(&message.canonical_bytes());
        message
    }

    fn accept(&mut self, message: &HandshakeMessage) {
        self.recv_seq = self.recv_seq.wrapping_add(1);
        self.reassembler.discard_before(self.recv_seq);
        self.transcript.extend_from_slice(&message.canonical_bytes());
    }

    fn process(&mut self, message: HandshakeMessage) -> Result<HandshakeOutput> {
        use HandshakeState::*;
        use HandshakeType as T;

        match (self.state, message.msg_type) {
            (WaitServerHello, T::ServerHello) => self.on_server_hello(message),
            (WaitServerCertificate, T::Certificate) | (WaitClientCertificate, T::Certificate) => {
                self.on_certificate(message)
            }
            (WaitServerKeyExchange, T::ServerKeyExchange) => self.on_server_key_exchange(message),
            (WaitServerFinished, T::Finished) => self.on_server_finished(message),
            (WaitClientHello, T::ClientHello) => self.on_client_hello(message),
            (WaitClientKeyExchange, T::ClientKeyExchange) => self.on_client_key_exchange(message),
            (WaitClientFinished, T::Finished) => self.on_client_finished(message),
            (state, msg_type) => {
                warn!(%state, %msg_type, "dropping unexpected handshake message");
                malformed_err!("unexpected {} in state {}", msg_type, state)
            }
        }
    }

    fn suite(&self) -> Result<CipherSuite> {
        self.suite.ok_or_else(|| Error::Internal("cipher suite not negotiated".into()))
    }

    fn on_client_hello(&mut self, message: HandshakeMessage) -> Result<HandshakeOutput> {
        let hello = ClientHello::decode(&message.body)?;

        let offered: Vec<ProtocolVersion> =
            hello.versions.iter().filter_map(|v| ProtocolVersion::from_wire(*v)).collect();
        let version = CipherSuiteRegistry::negotiate_version(
            &offered,
            self.context.min_version(),
            self.context.max_version(),
        )?;
        let suite = CipherSuiteRegistry::select(&hello.cipher_suites, self.context.cipher_suites())?;

        self.accept(&message);
        self.client_random = hello.random;
        self.server_random = rand::random();
        if offered.iter().any(|v| *v > version) {
            // Selecting below the client's best offer is deliberate here
            CipherSuiteRegistry::mark_downgrade(&mut self.server_random);
        }
        self.session_id = rand::random::<[u8; 32]>().to_vec();
        self.offered_versions = offered;
        self.version = Some(version);
        self.suite = Some(suite);

        let keypair = KeyExchange::new(suite.key_exchange).generate_keypair()?;

        let server_hello = ServerHello {
            version: version.wire(),
            random: self.server_random,
            session_id: self.session_id.clone(),
            cipher_suite: suite.code,
        };
        let certificate = Certificate { certificate: self.context.certificate().to_vec() };
        let key_exchange = ServerKeyExchange { public_key: keypair.public_key().to_vec() };
        self.kem_keypair = Some(keypair);

        let flight = vec![
            FlightItem::Handshake { epoch: 0, message: self.next_message(HandshakeType::ServerHello, server_hello.encode()) },
            FlightItem::Handshake { epoch: 0, message: self.next_message(HandshakeType::Certificate, certificate.encode()) },
            FlightItem::Handshake {
                epoch: 0,
                message: self.next_message(HandshakeType::ServerKeyExchange, key_exchange.encode()),
            },
        ];

        self.state = HandshakeState::WaitClientCertificate;
        debug!(%version, %suite, "selected parameters");
        Ok(HandshakeOutput { flight: Some(flight), progress: true, ..Default::default() })
    }

    fn on_server_hello(&mut self, message: HandshakeMessage) -> Result<HandshakeOutput> {
        let hello = ServerHello::decode(&message.body)?;

        let version = ProtocolVersion::from_wire(hello.version)
            .filter(|v| self.offered_versions.contains(v))
            .ok_or(Error::UnsupportedVersion(hello.version))?;
        let suite = CipherSuite::from_code(hello.cipher_suite)
            .filter(|s| self.context.cipher_suites().contains(s))
            .ok_or(Error::NoCommonCipherSuite)?;

        if CipherSuiteRegistry::downgrade_detected(&self.offered_versions, version, &hello.random) {
            return Err(Error::DowngradeDetected);
        }

        self.accept(&message);
        self.server_random = hello.random;
        self.session_id = hello.session_id;
        self.version = Some(version);
        self.suite = Some(suite);
        self.state = HandshakeState::WaitServerCertificate;
        debug!(%version, %suite, "server selected parameters");
        Ok(HandshakeOutput { progress: true, ..Default::default() })
    }

    fn on_certificate(&mut self, message: HandshakeMessage) -> Result<HandshakeOutput> {
        let certificate = Certificate::decode(&message.body)?;
        self.context.verify_peer_certificate(&certificate.certificate)?;

        self.accept(&message);
        self.peer_certificate = certificate.certificate;
        self.state = match self.role {
            Role::Client => HandshakeState::WaitServerKeyExchange,
            Role::Server => HandshakeState::WaitClientKeyExchange,
        };
        Ok(HandshakeOutput { progress: true, ..Default::default() })
    }

    fn on_server_key_exchange(&mut self, message: HandshakeMessage) -> Result<HandshakeOutput> {
        let key_exchange = ServerKeyExchange::decode(&message.body)?;
        let suite = self.suite()?;

        let encapsulation = KeyExchange::new(suite.key_exchange).encapsulate(&key_exchange.public_key)?;
        self.accept(&message);

        let security =
            SecurityParameters::derive(&encapsulation.shared_secret, self.client_random, self.server_random)?;
        let key_block = security.initial_key_block(suite.key_material())?;

        let certificate = Certificate { certificate: self.context.certificate().to_vec() };
        let client_key_exchange = ClientKeyExchange { ciphertext: encapsulation.ciphertext.clone() };
        let certificate = self.next_message(HandshakeType::Certificate, certificate.encode());
        let client_key_exchange = self.next_message(HandshakeType::ClientKeyExchange, client_key_exchange.encode());

        let verify_data = kdf::finished_verify_data(
            suite.hash,
            &key_block.client.mac_key,
            labels::CLIENT_FINISHED,
            &self.transcript,
        )?;
        let finished = self.next_message(HandshakeType::Finished, Finished { verify_data }.encode());

        let flight = vec![
            FlightItem::Handshake { epoch: 0, message: certificate },
            FlightItem::Handshake { epoch: 0, message: client_key_exchange },
            FlightItem::ChangeCipherSpec,
            FlightItem::Handshake { epoch: 1, message: finished },
        ];

        self.security = Some(security);
        self.key_block = Some(key_block.clone());
        self.state = HandshakeState::WaitServerFinished;
        Ok(HandshakeOutput { flight: Some(flight), keys: Some(key_block), progress: true, completed: false })
    }

    fn on_client_key_exchange(&mut self, message: HandshakeMessage) -> Result<HandshakeOutput> {
        let key_exchange = ClientKeyExchange::decode(&message.body)?;
        let suite = self.suite()?;
        let keypair = self
            .kem_keypair
            .as_ref()
            .ok_or_else(|| Error::Internal("server key pair missing".into()))?;

        let shared_secret = KeyExchange::new(suite.key_exchange).decapsulate_with(&key_exchange.ciphertext, keypair)?;
        self.accept(&message);
        self.kem_keypair = None;

        let security = SecurityParameters::derive(&shared_secret, self.client_random, self.server_random)?;
        let key_block = security.initial_key_block(suite.key_material())?;

        self.security = Some(security);
        self.key_block = Some(key_block.clone());
        self.state = HandshakeState::WaitClientFinished;
        Ok(HandshakeOutput { keys: Some(key_block), progress: true, ..Default::default() })
    }

    fn verify_finished(&self, message: &HandshakeMessage, mac_key_of: Role) -> Result<()> {
        let finished = Finished::decode(&message.body)?;
        let suite = self.suite()?;
        let key_block = self
            .key_block
            .as_ref()
            .ok_or_else(|| Error::Internal("key block missing".into()))?;

        let (mac_key, label) = match mac_key_of {
            Role::Client => (&key_block.client.mac_key, labels::CLIENT_FINISHED),
            Role::Server => (&key_block.server.mac_key, labels::SERVER_FINISHED),
        };
        let expected = kdf::finished_verify_data(suite.hash, mac_key, label, &self.transcript)?;
        if !constant_time_eq(&expected, &finished.verify_data) {
            return Err(Error::HandshakeVerificationFailed);
        }
        Ok(())
    }

    fn on_client_finished(&mut self, message: HandshakeMessage) -> Result<HandshakeOutput> {
        self.verify_finished(&message, Role::Client)?;
        self.accept(&message);

        let suite = self.suite()?;
        let key_block = self
            .key_block
            .as_ref()
            .ok_or_else(|| Error::Internal("key block missing".into()))?;
        let verify_data = kdf::finished_verify_data(
            suite.hash,
            &key_block.server.mac_key,
            labels::SERVER_FINISHED,
            &self.transcript,
        )?;
        let finished = self.next_message(HandshakeType::Finished, Finished { verify_data }.encode());

        self.state = HandshakeState::Complete;
        self.reassembler.clear();
        self.early.clear();
        Ok(HandshakeOutput {
            flight: Some(vec![FlightItem::ChangeCipherSpec, FlightItem::Handshake { epoch: 1, message: finished }]),
            keys: None,
            progress: true,
            completed: true,
        })
    }

    fn on_server_finished(&mut self, message: HandshakeMessage) -> Result<HandshakeOutput> {
        self.verify_finished(&message, Role::Server)?;
        self.accept(&message);
        self.state = HandshakeState::Complete;
        self.reassembler.clear();
        self.early.clear();
        Ok(HandshakeOutput { progress: true, completed: true, ..Default::default() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        context::ContextConfig,
        crypto::config::SecurityLevel,
        message::handshake::{fragment_message, parse_fragments},
    };

    fn context(role: Role, level: SecurityLevel) -> Result<Arc<Context>> {
        let config = ContextConfig {
            certificate: format!("{} certificate", role).into_bytes(),
            private_key: b"key".to_vec(),
            security_level: level,
            ..ContextConfig::for_role(role)
        };
        Ok(Arc::new(Context::new(config)?))
    }

    /// Deliver a flight to an engine, fragmenting each message
    fn deliver(engine: &mut HandshakeEngine, flight: &[FlightItem]) -> Result<HandshakeOutput> {
        let mut output = HandshakeOutput::default();
        for item in flight {
            if let FlightItem::Handshake { epoch, message } = item {
                for fragment in fragment_message(message, 400)? {
                    for (header, body) in parse_fragments(&fragment)? {
                        if let Received::Processed(o) = engine.receive_fragment(*epoch, &header, body)? {
                            output.merge(o);
                        }
                    }
                }
            }
        }
        Ok(output)
    }

    fn run_handshake(level: SecurityLevel) -> Result<(HandshakeEngine, HandshakeEngine)> {
        let mut client = HandshakeEngine::new(context(Role::Client, level)?);
        let mut server = HandshakeEngine::new(context(Role::Server, level)?);
        server.start()?;

        let hello = client.start()?.flight.ok_or(Error::Internal("no hello".into()))?;
        let server_flight = deliver(&mut server, &hello)?.flight.ok_or(Error::Internal("no flight".into()))?;
        let client_out = deliver(&mut client, &server_flight)?;
        assert!(client_out.keys.is_some());
        let client_flight = client_out.flight.ok_or(Error::Internal("no flight".into()))?;
        let server_out = deliver(&mut server, &client_flight)?;
        assert!(server_out.completed);
        let final_flight = server_out.flight.ok_or(Error::Internal("no flight".into()))?;
        assert!(deliver(&mut client, &final_flight)?.completed);
        Ok((client, server))
    }

    #[test]
    fn test_full_handshake_all_levels() -> Result<()> {
        for level in [
            SecurityLevel::Standard,
            SecurityLevel::PostQuantumMedium,
            SecurityLevel::PostQuantumHigh,
            SecurityLevel::Hybrid,
        ] {
            let (mut client, mut server) = run_handshake(level)?;
            let (client_params, _) = client.finish()?;
            let (server_params, _) = server.finish()?;
            assert_eq!(client_params.cipher_suite, server_params.cipher_suite);
            assert_eq!(client_params.version, ProtocolVersion::Dtls13);
            assert_eq!(client_params.peer_certificate, b"Server certificate");
            assert_eq!(server_params.peer_certificate, b"Client certificate");
        }
        Ok(())
    }

    #[test]
    fn test_no_common_suite() -> Result<()> {
        let mut client = HandshakeEngine::new(context(Role::Client, SecurityLevel::Standard)?);
        let mut server = HandshakeEngine::new(context(Role::Server, SecurityLevel::PostQuantumHigh)?);
        server.start()?;
        let hello = client.start()?.flight.ok_or(Error::Internal("no hello".into()))?;
        assert!(matches!(deliver(&mut server, &hello), Err(Error::NoCommonCipherSuite)));
        Ok(())
    }

    #[test]
    fn test_tampered_finished_fails() -> Result<()> {
        let mut client = HandshakeEngine::new(context(Role::Client, SecurityLevel::Hybrid)?);
        let mut server = HandshakeEngine::new(context(Role::Server, SecurityLevel::Hybrid)?);
        server.start()?;
        let hello = client.start()?.flight.ok_or(Error::Internal("no hello".into()))?;
        let server_flight = deliver(&mut server, &hello)?.flight.ok_or(Error::Internal("no flight".into()))?;
        let mut client_flight = deliver(&mut client, &server_flight)?.flight.ok_or(Error::Internal("no flight".into()))?;

        if let Some(FlightItem::Handshake { message, .. }) = client_flight.last_mut() {
            if let Some(byte) = message.body.last_mut() {
                *byte ^= 0x01;
            }
        }
        assert!(matches!(deliver(&mut server, &client_flight), Err(Error::HandshakeVerificationFailed)));
        Ok(())
    }

    #[test]
    fn test_out_of_order_and_duplicate_messages() -> Result<()> {
        let mut client = HandshakeEngine::new(context(Role::Client, SecurityLevel::Hybrid)?);
        let mut server = HandshakeEngine::new(context(Role::Server, SecurityLevel::Hybrid)?);
        server.start()?;
        let hello = client.start()?.flight.ok_or(Error::Internal("no hello".into()))?;
        let mut server_flight = deliver(&mut server, &hello)?.flight.ok_or(Error::Internal("no flight".into()))?;

        // Duplicate ClientHello is recognised
        if let Some(FlightItem::Handshake { message, .. }) = hello.first() {
            let fragment = fragment_message(message, 1000)?;
            let (header, body) = parse_fragments(&fragment[0])?[0];
            assert!(matches!(server.receive_fragment(0, &header, body)?, Received::Duplicate));
        }

        server_flight.reverse();
        let output = deliver(&mut client, &server_flight)?;
        assert!(output.flight.is_some());
        Ok(())
    }

    #[test]
    fn test_stale_partials_dropped_once_processed() -> Result<()> {
        let mut client = HandshakeEngine::new(context(Role::Client, SecurityLevel::Hybrid)?);
        let mut server = HandshakeEngine::new(context(Role::Server, SecurityLevel::Hybrid)?);
        server.start()?;
        let hello = client.start()?.flight.ok_or(Error::Internal("no hello".into()))?;
        let server_flight = deliver(&mut server, &hello)?.flight.ok_or(Error::Internal("no flight".into()))?;
        let (first, rest) = server_flight.split_first().ok_or(Error::Internal("empty flight".into()))?;

        // Later messages complete early and are held
        assert!(deliver(&mut client, rest)?.flight.is_none());

        // A retransmitted head fragment of a held message opens a new partial
        let held = rest
            .iter()
            .find_map(|item| match item {
                FlightItem::Handshake { message, .. } if message.body.len() > 4 => Some(message),
                _ => None,
            })
            .ok_or(Error::Internal("no fragmentable message".into()))?;
        let fragments = fragment_message(held, 4)?;
        let (header, body) = parse_fragments(&fragments[0])?[0];
        assert!(matches!(client.receive_fragment(0, &header, body)?, Received::Buffered));
        assert_eq!(client.reassembler.pending(), 1);

        let output = deliver(&mut client, std::slice::from_ref(first))?;
        assert!(output.flight.is_some());
        assert_eq!(client.reassembler.pending(), 0);
        Ok(())
    }

    #[test]
    fn test_unprotected_finished_rejected() -> Result<()> {
        let mut server = HandshakeEngine::new(context(Role::Server, SecurityLevel::Hybrid)?);
        server.start()?;
        let header = HandshakeHeader {
            msg_type: HandshakeType::Finished,
            length: 1,
            message_seq: 0,
            fragment_offset: 0,
            fragment_length: 1,
        };
        assert!(matches!(server.receive_fragment(0, &header, &[0]), Err(Error::MalformedRecord(_))));
        Ok(())
    }
}
