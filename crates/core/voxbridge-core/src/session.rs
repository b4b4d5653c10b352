//! Voice session registry
//!
//! One [`SessionRegistry`] owns the state of every guild's voice session. State
//! only changes through the transition methods below:
//!
//! ```text
//! Idle -> Connecting -> Connected -> Disconnected
//!              \______________________^   |
//!                          ^______________/ (rejoin: Disconnected -> Connecting)
//! ```

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{BridgeError, Result};

/// Lifecycle state of a guild voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Known but never joined
    Idle,
    /// Joining the voice channel / opening the backend link
    Connecting,
    /// Voice and backend both up
    Connected,
    /// Left the channel (or failed to join)
    Disconnected,
}

impl SessionState {
    /// Whether moving from `self` to `to` is a defined transition
    pub fn can_transition_to(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Idle, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Disconnected, Connecting)
        )
    }
}

/// Events published by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session changed lifecycle state
    StateChanged {
        /// Guild
        guild_id: u64,
        /// Previous state
        from: SessionState,
        /// New state
        to: SessionState,
    },
    /// Channel membership changed
    MembersChanged {
        /// Guild
        guild_id: u64,
        /// Users now in the channel (including the bot)
        total_users: usize,
        /// Users other than the bot
        remote_users: usize,
    },
}

/// Voice session state for a guild
#[derive(Debug, Clone)]
pub struct VoiceSession {
    /// Guild ID
    pub guild_id: u64,
    /// Voice channel the bot is in (or joining)
    pub channel_id: Option<u64>,
    /// Lifecycle state
    pub state: SessionState,
    /// Identifier of the current connection attempt
    pub session_id: Option<Uuid>,
    /// When the current connection attempt started
    pub joined_at: Option<Instant>,
    /// Wall-clock time of the current connection attempt
    pub started_at: Option<DateTime<Utc>>,
    /// Last activity timestamp
    pub last_activity: Instant,
    /// Users in the voice channel
    pub members: HashSet<u64>,
    /// Frames sent to the backend in this connection
    pub frames_sent: u64,
    /// Frames received from the backend in this connection
    pub frames_received: u64,
}

impl VoiceSession {
    /// A fresh, idle session
    pub fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            channel_id: None,
            state: SessionState::Idle,
            session_id: None,
            joined_at: None,
            started_at: None,
            last_activity: Instant::now(),
            members: HashSet::new(),
            frames_sent: 0,
            frames_received: 0,
        }
    }

    /// Update last activity timestamp
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Check if session has been idle too long
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }

    fn remote_users(&self, local_user: Option<u64>) -> HashSet<u64> {
        match local_user {
            Some(bot) => self.members.iter().copied().filter(|&u| u != bot).collect(),
            None => self.members.clone(),
        }
    }
}

/// Serializable view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Guild ID
    pub guild_id: u64,
    /// Voice channel
    pub channel_id: Option<u64>,
    /// Lifecycle state
    pub state: SessionState,
    /// Current connection identifier
    pub session_id: Option<String>,
    /// When the current connection attempt started
    pub started_at: Option<DateTime<Utc>>,
    /// Users in the channel, including the bot
    pub total_users: usize,
    /// Users other than the bot
    pub remote_users: usize,
    /// Member IDs, sorted
    pub users: Vec<u64>,
    /// Frames sent to the backend
    pub frames_sent: u64,
    /// Frames received from the backend
    pub frames_received: u64,
}

/// Registry of voice sessions keyed by guild ID
pub struct SessionRegistry {
    sessions: RwLock<HashMap<u64, VoiceSession>>,
    local_user: RwLock<Option<u64>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            sessions: RwLock::new(HashMap::new()),
            local_user: RwLock::new(None),
            events,
        }
    }

    /// Subscribe to state and membership events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Record the bot's own user ID (excluded from remote users)
    pub fn set_local_user(&self, user_id: u64) {
        info!(user_id = %user_id, "Local bot user registered");
        *self.local_user.write() = Some(user_id);
    }

    /// The bot's own user ID, if known
    pub fn local_user(&self) -> Option<u64> {
        *self.local_user.read()
    }

    /// Start connecting `guild_id` to `channel_id`
    ///
    /// Creates the session if needed. Allowed from Idle and Disconnected.
    pub fn begin_connect(&self, guild_id: u64, channel_id: u64) -> Result<Uuid> {
        let session_id = Uuid::new_v4();
        let from = {
            let mut sessions = self.sessions.write();
            let session = sessions
                .entry(guild_id)
                .or_insert_with(|| VoiceSession::new(guild_id));
            let from = Self::check(session, SessionState::Connecting)?;
            session.state = SessionState::Connecting;
            session.channel_id = Some(channel_id);
            session.session_id = Some(session_id);
            session.joined_at = Some(Instant::now());
            session.started_at = Some(Utc::now());
            session.members.clear();
            session.frames_sent = 0;
            session.frames_received = 0;
            session.touch();
            from
        };
        self.publish_state(guild_id, from, SessionState::Connecting);
        Ok(session_id)
    }

    /// Mark a connecting session as connected
    pub fn mark_connected(&self, guild_id: u64) -> Result<()> {
        self.transition(guild_id, SessionState::Connected)
    }

    /// Mark a session as disconnected
    pub fn mark_disconnected(&self, guild_id: u64) -> Result<()> {
        self.transition(guild_id, SessionState::Disconnected)
    }

    /// Current state of a guild's session (Idle when unknown)
    pub fn state(&self, guild_id: u64) -> SessionState {
        self.sessions
            .read()
            .get(&guild_id)
            .map(|s| s.state)
            .unwrap_or(SessionState::Idle)
    }

    /// Whether the guild's session is connected
    pub fn is_connected(&self, guild_id: u64) -> bool {
        self.state(guild_id) == SessionState::Connected
    }

    /// Channel the guild's session is bound to
    pub fn channel(&self, guild_id: u64) -> Option<u64> {
        self.sessions.read().get(&guild_id).and_then(|s| s.channel_id)
    }

    /// Serializable snapshot of a session
    pub fn snapshot(&self, guild_id: u64) -> Option<SessionInfo> {
        let local = self.local_user();
        let sessions = self.sessions.read();
        let session = sessions.get(&guild_id)?;
        let mut users: Vec<u64> = session.members.iter().copied().collect();
        users.sort_unstable();
        Some(SessionInfo {
            guild_id,
            channel_id: session.channel_id,
            state: session.state,
            session_id: session.session_id.map(|id| id.to_string()),
            started_at: session.started_at,
            total_users: session.members.len(),
            remote_users: session.remote_users(local).len(),
            users,
            frames_sent: session.frames_sent,
            frames_received: session.frames_received,
        })
    }

    /// Replace the member list of a guild's channel
    pub fn set_members(&self, guild_id: u64, members: impl IntoIterator<Item = u64>) -> Result<()> {
        {
            let mut sessions = self.sessions.write();
            let session = sessions
                .get_mut(&guild_id)
                .ok_or_else(|| BridgeError::session(format!("no session for guild {}", guild_id)))?;
            session.members = members.into_iter().collect();
        }
        self.publish_members(guild_id);
        Ok(())
    }

    /// A user entered `channel_id`; ignored unless it is the session's channel
    ///
    /// Returns whether the session was affected.
    pub fn member_joined(&self, guild_id: u64, channel_id: u64, user_id: u64) -> bool {
        let affected = {
            let mut sessions = self.sessions.write();
            match sessions.get_mut(&guild_id) {
                Some(session) if session.is_tracking(channel_id) => {
                    debug!(guild_id = %guild_id, user_id = %user_id, "User joined voice channel");
                    session.members.insert(user_id);
                    true
                }
                _ => false,
            }
        };
        if affected {
            self.publish_members(guild_id);
        }
        affected
    }

    /// A user left `channel_id`; ignored unless it is the session's channel
    ///
    /// Returns whether the session was affected.
    pub fn member_left(&self, guild_id: u64, channel_id: u64, user_id: u64) -> bool {
        let affected = {
            let mut sessions = self.sessions.write();
            match sessions.get_mut(&guild_id) {
                Some(session) if session.is_tracking(channel_id) => {
                    debug!(guild_id = %guild_id, user_id = %user_id, "User left voice channel");
                    session.members.remove(&user_id);
                    true
                }
                _ => false,
            }
        };
        if affected {
            self.publish_members(guild_id);
        }
        affected
    }

    /// Members other than the bot
    pub fn remote_users(&self, guild_id: u64) -> HashSet<u64> {
        let local = self.local_user();
        self.sessions
            .read()
            .get(&guild_id)
            .map(|s| s.remote_users(local))
            .unwrap_or_default()
    }

    /// Whether anyone other than the bot is in the channel
    pub fn has_remote_users(&self, guild_id: u64) -> bool {
        !self.remote_users(guild_id).is_empty()
    }

    /// Refresh the activity timestamp
    pub fn touch(&self, guild_id: u64) {
        if let Some(session) = self.sessions.write().get_mut(&guild_id) {
            session.touch();
        }
    }

    /// Count a frame sent to the backend
    pub fn record_sent(&self, guild_id: u64) {
        if let Some(session) = self.sessions.write().get_mut(&guild_id) {
            session.frames_sent += 1;
            session.touch();
        }
    }

    /// Count a frame received from the backend
    pub fn record_received(&self, guild_id: u64) {
        if let Some(session) = self.sessions.write().get_mut(&guild_id) {
            session.frames_received += 1;
            session.touch();
        }
    }

    /// Connected sessions idle for longer than `timeout`
    pub fn idle_sessions(&self, timeout: Duration) -> Vec<u64> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.state == SessionState::Connected && s.is_idle(timeout))
            .map(|s| s.guild_id)
            .collect()
    }

    /// Connected sessions with nobody but the bot left in the channel
    pub fn alone_sessions(&self) -> Vec<u64> {
        let local = self.local_user();
        self.sessions
            .read()
            .values()
            .filter(|s| s.state == SessionState::Connected && s.remote_users(local).is_empty())
            .map(|s| s.guild_id)
            .collect()
    }

    /// Guilds with a known session, in any state
    pub fn guilds(&self) -> Vec<u64> {
        self.sessions.read().keys().copied().collect()
    }

    /// Drop a session entirely; only allowed once it is not active
    pub fn remove(&self, guild_id: u64) -> Result<Option<VoiceSession>> {
        let mut sessions = self.sessions.write();
        match sessions.get(&guild_id).map(|s| s.state) {
            Some(SessionState::Connecting) | Some(SessionState::Connected) => Err(BridgeError::session(
                format!("guild {} still has an active session", guild_id),
            )),
            _ => Ok(sessions.remove(&guild_id)),
        }
    }

    fn transition(&self, guild_id: u64, to: SessionState) -> Result<()> {
        let from = {
            let mut sessions = self.sessions.write();
            let session = sessions
                .get_mut(&guild_id)
                .ok_or_else(|| BridgeError::session(format!("no session for guild {}", guild_id)))?;
            let from = Self::check(session, to)?;
            session.state = to;
            session.touch();
            if to == SessionState::Disconnected {
                session.members.clear();
            }
            from
        };
        self.publish_state(guild_id, from, to);
        Ok(())
    }

    fn check(session: &VoiceSession, to: SessionState) -> Result<SessionState> {
        let from = session.state;
        if !from.can_transition_to(to) {
            return Err(BridgeError::InvalidTransition {
                guild_id: session.guild_id,
                from,
                to,
            });
        }
        Ok(from)
    }

    fn publish_state(&self, guild_id: u64, from: SessionState, to: SessionState) {
        info!(guild_id = %guild_id, from = ?from, to = ?to, "Voice session state changed");
        // No subscribers is fine
        let _ = self.events.send(SessionEvent::StateChanged { guild_id, from, to });
    }

    fn publish_members(&self, guild_id: u64) {
        let local = self.local_user();
        let counts = self
            .sessions
            .read()
            .get(&guild_id)
            .map(|s| (s.members.len(), s.remote_users(local).len()));
        if let Some((total_users, remote_users)) = counts {
            let _ = self.events.send(SessionEvent::MembersChanged {
                guild_id,
                total_users,
                remote_users,
            });
        }
    }
}

impl VoiceSession {
    fn is_tracking(&self, channel_id: u64) -> bool {
        matches!(self.state, SessionState::Connecting | SessionState::Connected)
            && self.channel_id == Some(channel_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lifecycle() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.state(1), SessionState::Idle);

        registry.begin_connect(1, 10).unwrap();
        assert_eq!(registry.state(1), SessionState::Connecting);
        registry.mark_connected(1).unwrap();
        assert!(registry.is_connected(1));
        registry.mark_disconnected(1).unwrap();
        assert_eq!(registry.state(1), SessionState::Disconnected);

        // Rejoin gets a new session id
        let first = registry.snapshot(1).unwrap().session_id;
        registry.begin_connect(1, 11).unwrap();
        assert_ne!(registry.snapshot(1).unwrap().session_id, first);
        assert_eq!(registry.channel(1), Some(11));
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let registry = SessionRegistry::new();
        assert!(registry.mark_connected(1).is_err());

        registry.begin_connect(1, 10).unwrap();
        assert!(matches!(
            registry.begin_connect(1, 10),
            Err(BridgeError::InvalidTransition {
                from: SessionState::Connecting,
                to: SessionState::Connecting,
                ..
            })
        ));
        registry.mark_connected(1).unwrap();
        assert!(registry.mark_connected(1).is_err());
        assert_eq!(registry.state(1), SessionState::Connected);
    }

    #[test]
    fn test_join_failure_path() {
        let registry = SessionRegistry::new();
        registry.begin_connect(3, 30).unwrap();
        registry.mark_disconnected(3).unwrap();
        assert_eq!(registry.state(3), SessionState::Disconnected);
    }

    #[test]
    fn test_membership_tracks_only_session_channel() {
        let registry = SessionRegistry::new();
        registry.set_local_user(99);
        registry.begin_connect(1, 10).unwrap();
        registry.set_members(1, [99, 5]).unwrap();
        registry.mark_connected(1).unwrap();

        assert!(registry.member_joined(1, 10, 6));
        assert!(!registry.member_joined(1, 12, 7));
        assert_eq!(registry.remote_users(1), HashSet::from([5, 6]));

        assert!(registry.member_left(1, 10, 5));
        assert!(registry.member_left(1, 10, 6));
        assert!(!registry.has_remote_users(1));
        assert_eq!(registry.alone_sessions(), vec![1]);

        let info = registry.snapshot(1).unwrap();
        assert_eq!(info.total_users, 1);
        assert_eq!(info.remote_users, 0);
        assert_eq!(info.users, vec![99]);
    }

    #[test]
    fn test_events_are_published() {
        let registry = SessionRegistry::new();
        let mut rx = registry.subscribe();
        registry.begin_connect(1, 10).unwrap();
        registry.set_members(1, [4]).unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::StateChanged {
                guild_id: 1,
                from: SessionState::Idle,
                to: SessionState::Connecting
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::MembersChanged {
                guild_id: 1,
                total_users: 1,
                remote_users: 1
            }
        );
    }

    #[test]
    fn test_counters_and_idle() {
        let registry = SessionRegistry::new();
        registry.begin_connect(1, 10).unwrap();
        registry.mark_connected(1).unwrap();
        registry.record_sent(1);
        registry.record_sent(1);
        registry.record_received(1);
        let info = registry.snapshot(1).unwrap();
        assert_eq!((info.frames_sent, info.frames_received), (2, 1));

        assert!(registry.idle_sessions(Duration::from_secs(300)).is_empty());
        assert_eq!(registry.idle_sessions(Duration::ZERO).len(), 1);
    }

    #[test]
    fn test_remove_requires_inactive_session() {
        let registry = SessionRegistry::new();
        registry.begin_connect(1, 10).unwrap();
        assert!(registry.remove(1).is_err());
        registry.mark_disconnected(1).unwrap();
        assert!(registry.remove(1).unwrap().is_some());
        assert!(registry.guilds().is_empty());
    }
}
