/*!
Async UDP transport binding for PQ-DTLS sessions.

Each [`Session`] is owned by one actor task. The actor receives datagrams and
commands over channels, arms a single `tokio::time` sleep for the session's
next timeout, writes outgoing datagrams to the socket and forwards session
events to its [`Connection`].

A [`Server`] runs one demultiplexer task that reads the shared socket and
routes datagrams to per-peer actors through a [`SessionTable`]. A [`Client`]
binds its own socket and runs a single actor.
*/

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

use crate::config_err;
use crate::core::{
    context::Context,
    error::{Error, Result},
    session::{
        session::{Session, SessionEvent},
        state::{ConnectionState, Role},
    },
};

/// Largest datagram read from a socket
const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Datagrams queued for one session before new ones are dropped
const PEER_CHANNEL_CAPACITY: usize = 256;

/// Commands queued for one session
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Established connections waiting for `Server::accept`
const ACCEPT_QUEUE_SIZE: usize = 64;

/// Datagram socket the transport runs on
pub trait DatagramSocket: Send + Sync + 'static {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> impl Future<Output = io::Result<usize>> + Send;

    fn recv_from(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl DatagramSocket for UdpSocket {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> impl Future<Output = io::Result<usize>> + Send {
        UdpSocket::send_to(self, buf, target)
    }

    fn recv_from(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send {
        UdpSocket::recv_from(self, buf)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// Opaque handle to a server-side session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId {
    index: u32,
    generation: u32,
}

struct Slot<T> {
    generation: u32,
    entry: Option<(SocketAddr, T)>,
}

/// Arena of sessions keyed by [`SessionId`], indexed by peer address
///
/// Freed slots are reused with a bumped generation so stale ids never
/// resolve to a newer session.
pub struct SessionTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    by_peer: HashMap<SocketAddr, SessionId>,
}

impl<T> SessionTable<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new(), free: Vec::new(), by_peer: HashMap::new() }
    }

    /// Insert a session for `peer`, replacing any previous one
    pub fn insert(&mut self, peer: SocketAddr, value: T) -> SessionId {
        if let Some(old) = self.by_peer.get(&peer).copied() {
            self.remove(old);
        }

        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some((peer, value));
                SessionId { index, generation: slot.generation }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot { generation: 0, entry: Some((peer, value)) });
                SessionId { index, generation: 0 }
            }
        };
        self.by_peer.insert(peer, id);
        id
    }

    pub fn get(&self, id: SessionId) -> Option<&T> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
            .map(|(_, value)| value)
    }

    /// Session currently bound to `peer`
    pub fn lookup(&self, peer: &SocketAddr) -> Option<(SessionId, &T)> {
        let id = *self.by_peer.get(peer)?;
        self.get(id).map(|value| (id, value))
    }

    /// Free the slot; stale ids are ignored
    pub fn remove(&mut self, id: SessionId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let (peer, value) = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        if self.by_peer.get(&peer) == Some(&id) {
            self.by_peer.remove(&peer);
        }
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.by_peer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_peer.is_empty()
    }
}

impl<T> Default for SessionTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of a session published by its actor
#[derive(Debug, Clone, Copy)]
struct Status {
    state: ConnectionState,
    epoch: u16,
}

enum Command {
    Send(Vec<u8>, oneshot::Sender<Result<()>>),
    Rekey(oneshot::Sender<Result<()>>),
    Close(oneshot::Sender<()>),
}

/// Where a connection goes once its handshake completes
enum Handoff {
    Connect(oneshot::Sender<Result<Connection>>),
    Accept(mpsc::Sender<Connection>),
}

/// What the actor does when it exits
enum Exit {
    Abort(JoinHandle<()>),
    Release(mpsc::UnboundedSender<SessionId>, SessionId),
}

struct Actor<S: DatagramSocket> {
    session: Session,
    socket: Arc<S>,
    inbound: mpsc::Receiver<Bytes>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
    status: watch::Sender<Status>,
    pending: Option<(Connection, Handoff)>,
    exit: Exit,
}

/// Wire up an actor and the connection handle it will hand off
fn spawn_actor<S: DatagramSocket>(
    session: Session,
    socket: Arc<S>,
    inbound: mpsc::Receiver<Bytes>,
    handoff: Handoff,
    exit: Exit,
) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) =
        watch::channel(Status { state: session.state(), epoch: session.epoch() });

    let connection = Connection {
        peer: session.peer(),
        role: session.role(),
        commands: command_tx,
        events: event_rx,
        status: status_rx,
        closed: false,
    };

    let actor = Actor {
        session,
        socket,
        inbound,
        commands: command_rx,
        events: event_tx,
        status: status_tx,
        pending: Some((connection, handoff)),
        exit,
    };
    tokio::spawn(actor.run());
}

impl<S: DatagramSocket> Actor<S> {
    async fn run(mut self) {
        loop {
            self.flush().await;
            if self.session.is_closed() {
                break;
            }

            let deadline = self.session.next_timeout();
            let sleep = async move {
                match deadline {
                    Some(at) => time::sleep_until(Instant::from_std(at)).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                datagram = self.inbound.recv() => match datagram {
                    Some(datagram) => self.session.handle_datagram(&datagram, now()),
                    None => self.session.close(),
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // Every handle is gone
                    None => self.session.close(),
                },
                _ = sleep => self.session.handle_timeout(now()),
            }
        }

        self.flush().await;
        if let Some((_, Handoff::Connect(reply))) = self.pending.take() {
            let error = self.session.take_error().unwrap_or(Error::SessionClosed);
            let _ = reply.send(Err(error));
        }

        match self.exit {
            Exit::Abort(reader) => reader.abort(),
            Exit::Release(exits, id) => {
                let _ = exits.send(id);
            }
        }
        debug!(peer = %self.session.peer(), "session actor stopped");
    }

    fn handle_command(&mut self, command: Command) {
        let now = now();
        match command {
            Command::Send(payload, reply) => {
                let _ = reply.send(self.session.send_application_data(&payload, now));
            }
            Command::Rekey(reply) => {
                let result = self.session.rekey(now);
                self.publish();
                let _ = reply.send(result);
            }
            Command::Close(reply) => {
                self.session.close();
                let _ = reply.send(());
            }
        }
    }

    /// Write queued datagrams and forward queued events
    async fn flush(&mut self) {
        while let Some(transmit) = self.session.poll_transmit() {
            if let Err(err) = self.socket.send_to(&transmit.payload, transmit.destination).await {
                warn!(peer = %transmit.destination, error = %err, "datagram send failed");
            }
        }

        // Handles observe the new state before the events that caused it
        self.publish();

        while let Some(event) = self.session.poll_event() {
            let connected = event == SessionEvent::Connected;
            let _ = self.events.send(event);
            if connected {
                self.hand_off().await;
            }
        }
    }

    fn publish(&self) {
        let _ = self.status.send(Status { state: self.session.state(), epoch: self.session.epoch() });
    }

    async fn hand_off(&mut self) {
        match self.pending.take() {
            Some((connection, Handoff::Connect(reply))) => {
                let _ = reply.send(Ok(connection));
            }
            Some((connection, Handoff::Accept(queue))) => {
                if queue.send(connection).await.is_err() {
                    debug!(peer = %self.session.peer(), "server gone; dropping connection");
                }
            }
            None => {}
        }
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

/// Handle to an established session
pub struct Connection {
    peer: SocketAddr,
    role: Role,
    commands: mpsc::Sender<Command>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    status: watch::Receiver<Status>,
    closed: bool,
}

impl Connection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Current write epoch
    pub fn epoch(&self) -> u16 {
        self.status.borrow().epoch
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Send one application message
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Send(data.to_vec(), reply))
            .await
            .map_err(|_| Error::SessionClosed)?;
        response.await.map_err(|_| Error::SessionClosed)?
    }

    /// Move the session to the next key epoch
    pub async fn rekey(&self) -> Result<()> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Rekey(reply))
            .await
            .map_err(|_| Error::SessionClosed)?;
        response.await.map_err(|_| Error::SessionClosed)?
    }

    /// Next session event; `None` once the session has stopped
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Next application message
    ///
    /// Fails with `SessionClosed` once the session ends; the cause, if any,
    /// was reported through [`Connection::next_event`].
    pub async fn recv(&mut self) -> Result<Vec<u8>> {
        while let Some(event) = self.events.recv().await {
            match event {
                SessionEvent::Data(data) => return Ok(data),
                SessionEvent::Error(kind) => debug!(peer = %self.peer, %kind, "session failed"),
                SessionEvent::Closed => break,
                SessionEvent::Connected | SessionEvent::Rekeyed(_) => {}
            }
        }
        Err(Error::SessionClosed)
    }

    /// Close the session; calling it again has no effect
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::Close(reply)).await.is_ok() {
            let _ = response.await;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("role", &self.role)
            .field("state", &self.state())
            .field("epoch", &self.epoch())
            .finish()
    }
}

/// Client endpoint
pub struct Client;

impl Client {
    /// Connect to `addr` from an ephemeral local port
    ///
    /// Resolves once the handshake completes, or fails with the error that
    /// ended it (including `HandshakeTimeout`).
    pub async fn connect(context: Arc<Context>, addr: SocketAddr) -> Result<Connection> {
        let local: SocketAddr = match addr {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await?;
        Self::connect_with(context, Arc::new(socket), addr).await
    }

    /// Connect over an existing socket
    pub async fn connect_with<S: DatagramSocket>(
        context: Arc<Context>,
        socket: Arc<S>,
        addr: SocketAddr,
    ) -> Result<Connection> {
        if context.role() != Role::Client {
            return config_err!("client requires a client context");
        }

        let mut session = Session::new(context, addr, now());
        session.start(now())?;

        let (inbound_tx, inbound_rx) = mpsc::channel(PEER_CHANNEL_CAPACITY);
        let reader = tokio::spawn(read_from_peer(Arc::clone(&socket), addr, inbound_tx));

        let (reply, connected) = oneshot::channel();
        spawn_actor(session, socket, inbound_rx, Handoff::Connect(reply), Exit::Abort(reader));

        let connection = connected.await.map_err(|_| Error::SessionClosed)??;
        info!(peer = %addr, epoch = connection.epoch(), "connected");
        Ok(connection)
    }
}

/// Forward datagrams from `peer` to the client actor
async fn read_from_peer<S: DatagramSocket>(socket: Arc<S>, peer: SocketAddr, inbound: mpsc::Sender<Bytes>) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) if from == peer => {
                if inbound.send(Bytes::copy_from_slice(&buf[..len])).await.is_err() {
                    break;
                }
            }
            Ok((_, from)) => trace!(%from, "ignoring datagram from unknown peer"),
            Err(err) => {
                warn!(error = %err, "udp receive failed; retrying");
                time::sleep(std::time::Duration::from_millis(50)).await;
            }
        }
    }
}

/// Server endpoint
pub struct Server {
    local_addr: SocketAddr,
    accept: mpsc::Receiver<Connection>,
    demux: JoinHandle<()>,
}

impl Server {
    /// Bind `addr` and start accepting sessions
    pub async fn listen(context: Arc<Context>, addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Self::listen_with(context, Arc::new(socket))
    }

    /// Accept sessions on an existing socket
    pub fn listen_with<S: DatagramSocket>(context: Arc<Context>, socket: Arc<S>) -> Result<Self> {
        if context.role() != Role::Server {
            return config_err!("server requires a server context");
        }
        let local_addr = socket.local_addr()?;
        let (accept_tx, accept_rx) = mpsc::channel(ACCEPT_QUEUE_SIZE);
        let demux = tokio::spawn(demultiplex(context, socket, accept_tx));

        info!(%local_addr, "listening");
        Ok(Self { local_addr, accept: accept_rx, demux })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next established connection
    pub async fn accept(&mut self) -> Result<Connection> {
        self.accept.recv().await.ok_or(Error::SessionClosed)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.demux.abort();
    }
}

/// Route datagrams to per-peer actors, creating sessions for new peers
async fn demultiplex<S: DatagramSocket>(
    context: Arc<Context>,
    socket: Arc<S>,
    accept: mpsc::Sender<Connection>,
) {
    let mut table: SessionTable<mpsc::Sender<Bytes>> = SessionTable::new();
    let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, peer)) => {
                    let datagram = Bytes::copy_from_slice(&buf[..len]);
                    route(&mut table, &context, &socket, &accept, &exit_tx, peer, datagram);
                }
                Err(err) => {
                    warn!(error = %err, "udp receive failed; retrying");
                    time::sleep(std::time::Duration::from_millis(50)).await;
                }
            },
            Some(id) = exit_rx.recv() => {
                table.remove(id);
                trace!(sessions = table.len(), "session released");
            }
        }
    }
}

fn route<S: DatagramSocket>(
    table: &mut SessionTable<mpsc::Sender<Bytes>>,
    context: &Arc<Context>,
    socket: &Arc<S>,
    accept: &mpsc::Sender<Connection>,
    exits: &mpsc::UnboundedSender<SessionId>,
    peer: SocketAddr,
    datagram: Bytes,
) {
    if let Some((id, inbound)) = table.lookup(&peer) {
        match inbound.try_send(datagram) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => warn!(%peer, "session queue full; dropping datagram"),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                table.remove(id);
            }
        }
        return;
    }

    let now = now();
    let mut session = Session::new(Arc::clone(context), peer, now);
    if let Err(err) = session.start(now) {
        warn!(%peer, error = %err, "could not start session");
        return;
    }

    let (inbound_tx, inbound_rx) = mpsc::channel(PEER_CHANNEL_CAPACITY);
    let _ = inbound_tx.try_send(datagram);
    let id = table.insert(peer, inbound_tx);
    debug!(%peer, sessions = table.len(), "new session");

    spawn_actor(
        session,
        Arc::clone(socket),
        inbound_rx,
        Handoff::Accept(accept.clone()),
        Exit::Release(exits.clone(), id),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, port))
    }

    #[test]
    fn test_table_insert_lookup_remove() {
        let mut table = SessionTable::new();
        let a = table.insert(addr(1), "a");
        let b = table.insert(addr(2), "b");
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(a), Some(&"a"));
        assert_eq!(table.lookup(&addr(2)), Some((b, &"b")));

        assert_eq!(table.remove(a), Some("a"));
        assert_eq!(table.remove(a), None);
        assert!(table.lookup(&addr(1)).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_stale_id_does_not_resolve() {
        let mut table = SessionTable::new();
        let old = table.insert(addr(1), 1);
        table.remove(old);
        let new = table.insert(addr(3), 3);

        // Slot is reused under a new generation
        assert_eq!(old.index, new.index);
        assert_eq!(table.get(old), None);
        assert_eq!(table.remove(old), None);
        assert_eq!(table.get(new), Some(&3));
    }

    #[test]
    fn test_reinsert_replaces_peer() {
        let mut table = SessionTable::new();
        let first = table.insert(addr(1), 1);
        let second = table.insert(addr(1), 2);
        assert_ne!(first, second);
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(&addr(1)), Some((second, &2)));
        assert!(!table.is_empty());
    }
}
