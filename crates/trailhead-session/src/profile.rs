//! Profile lookup: the collaborator that turns a join into a profile record.
//!
//! The orchestrator does not care where profiles live. It calls
//! [`ProfileStore::get_or_create_profile`] once per successful admission and
//! keeps the returned [`ProfileRecord`] on the player. Swap in a database
//! backed store by implementing the trait.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::Mutex;
use trailhead_protocol::GameData;

use crate::SessionError;

/// Who a joining player claims to be.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProfileIdentity {
    /// A verified GameJolt account. The account id is the identity; the
    /// display name may change between sessions.
    GameJolt { id: String, name: String },
    /// An offline profile, identified by its display name alone.
    Offline { name: String },
}

impl ProfileIdentity {
    /// Reads the identity fields of a join payload.
    pub fn from_game_data(data: &GameData) -> Self {
        if data.is_gamejolt_player() && !data.gamejolt_id().is_empty() {
            Self::GameJolt {
                id: data.gamejolt_id().to_string(),
                name: data.name().to_string(),
            }
        } else {
            Self::Offline {
                name: data.name().to_string(),
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::GameJolt { name, .. } | Self::Offline { name } => name,
        }
    }

    pub fn is_gamejolt(&self) -> bool {
        matches!(self, Self::GameJolt { .. })
    }

    /// Storage key. Offline names compare case-insensitively.
    pub fn key(&self) -> String {
        match self {
            Self::GameJolt { id, .. } => format!("gj:{id}"),
            Self::Offline { name } => format!("offline:{}", name.to_lowercase()),
        }
    }

    /// Whether `entry` (a name or GameJolt id from a ban list) refers to
    /// this identity.
    pub fn matches(&self, entry: &str) -> bool {
        match self {
            Self::GameJolt { id, name } => {
                id == entry || name.eq_ignore_ascii_case(entry)
            }
            Self::Offline { name } => name.eq_ignore_ascii_case(entry),
        }
    }
}

impl fmt::Display for ProfileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GameJolt { id, name } => write!(f, "{name} (gamejolt {id})"),
            Self::Offline { name } => write!(f, "{name} (offline)"),
        }
    }
}

/// A stored profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRecord {
    pub identity: ProfileIdentity,
    pub first_seen: SystemTime,
    /// How many times this profile has joined, including the current join.
    pub joins: u32,
}

/// Looks up or creates the profile behind a join.
///
/// May block on I/O; the orchestrator never holds its registry lock
/// across this call.
///
/// # Example
///
/// ```rust
/// use trailhead_session::{ProfileIdentity, ProfileRecord, ProfileStore, SessionError};
///
/// /// Never remembers anyone.
/// struct Forgetful;
///
/// impl ProfileStore for Forgetful {
///     async fn get_or_create_profile(
///         &self,
///         identity: &ProfileIdentity,
///     ) -> Result<ProfileRecord, SessionError> {
///         Ok(ProfileRecord {
///             identity: identity.clone(),
///             first_seen: std::time::SystemTime::now(),
///             joins: 1,
///         })
///     }
/// }
/// ```
pub trait ProfileStore: Send + Sync + 'static {
    fn get_or_create_profile(
        &self,
        identity: &ProfileIdentity,
    ) -> impl std::future::Future<Output = Result<ProfileRecord, SessionError>> + Send;
}

/// A [`ProfileStore`] that keeps profiles in memory for the life of the
/// process.
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    profiles: Mutex<HashMap<String, ProfileRecord>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct profiles seen so far.
    pub async fn len(&self) -> usize {
        self.profiles.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.profiles.lock().await.is_empty()
    }
}

impl ProfileStore for InMemoryProfileStore {
    async fn get_or_create_profile(
        &self,
        identity: &ProfileIdentity,
    ) -> Result<ProfileRecord, SessionError> {
        let mut profiles = self.profiles.lock().await;
        let record = profiles
            .entry(identity.key())
            .and_modify(|r| {
                r.joins += 1;
                // GameJolt players may have renamed themselves.
                r.identity = identity.clone();
            })
            .or_insert_with(|| {
                tracing::info!(%identity, "new profile created");
                ProfileRecord {
                    identity: identity.clone(),
                    first_seen: SystemTime::now(),
                    joins: 1,
                }
            });
        Ok(record.clone())
    }
}

/// Lets one store outlive the orchestrators that borrow it.
impl<S: ProfileStore> ProfileStore for Arc<S> {
    fn get_or_create_profile(
        &self,
        identity: &ProfileIdentity,
    ) -> impl std::future::Future<Output = Result<ProfileRecord, SessionError>> + Send {
        S::get_or_create_profile(self, identity)
    }
}
