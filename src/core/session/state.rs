/*!
Session state management for the PQ-DTLS protocol.

This module defines connection states and the transitions a session may take.
*/

use std::fmt;

#[cfg(feature = "serde-support")]
use serde::{Deserialize, Serialize};

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not started, or closed after use
    Closed,
    /// Handshake in progress
    Connecting,
    /// Handshake complete; application data may flow
    Connected,
    /// Peer sent close_notify
    Disconnected,
    /// A fatal error ended the session
    Error,
}

impl ConnectionState {
    /// Whether the session can never carry data again
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Closed => write!(f, "Closed"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Error => write!(f, "Error"),
        }
    }
}

/// Endpoint role in the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub enum Role {
    /// Client role (initiates connection)
    Client,
    /// Server role (accepts connection)
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "Client"),
            Role::Server => write!(f, "Server"),
        }
    }
}

/// Session state manager
///
/// Guards transitions so a closed or failed session cannot be revived.
#[derive(Debug, Clone, Copy)]
pub struct StateManager {
    state: ConnectionState,
    role: Role,
    started: bool,
}

impl StateManager {
    pub fn new(role: Role) -> Self {
        Self { state: ConnectionState::Closed, role, started: false }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_state(&self, state: ConnectionState) -> bool {
        self.state == state
    }

    /// Whether the handshake may begin
    pub fn can_start(&self) -> bool {
        !self.started && self.state == ConnectionState::Closed
    }

    /// Whether application data may be sent or received
    pub fn can_transfer_data(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Whether the session has finished for good
    pub fn is_finished(&self) -> bool {
        self.started && self.state != ConnectionState::Connecting && self.state != ConnectionState::Connected
    }

    pub fn transition_to_connecting(&mut self) {
        if self.can_start() {
            self.started = true;
            self.state = ConnectionState::Connecting;
        }
    }

    pub fn transition_to_connected(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Connected;
        }
    }

    pub fn transition_to_disconnected(&mut self) {
        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected) {
            self.state = ConnectionState::Disconnected;
        }
    }

    pub fn transition_to_error(&mut self) {
        self.started = true;
        self.state = ConnectionState::Error;
    }

    pub fn transition_to_closed(&mut self) {
        self.started = true;
        if !self.state.is_terminal() {
            self.state = ConnectionState::Closed;
        }
    }
}
