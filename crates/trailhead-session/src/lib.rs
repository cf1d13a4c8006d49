//! Player sessions for Trailhead.
//!
//! This crate owns everything the server knows about players:
//!
//! 1. **Registry**: who is joining, who has joined, and under which ID
//!    ([`SessionOrchestrator`], [`IdAllocator`]).
//! 2. **Admission**: the ordered checks a join must pass
//!    ([`SessionConfig::admit`], [`Denial`]).
//! 3. **Collaborators**: where profiles come from ([`ProfileStore`]) and how
//!    server text is worded ([`Localizer`]).
//! 4. **Messages**: the notifications, commands and queries it exchanges
//!    over the dispatcher ([`messages`]).
//!
//! # How it fits in the stack
//!
//! ```text
//! Connection actor (above)  ← publishes GameDataReceived, Disconnected, …
//!     ↕                       reached back through PlayerLink
//! Session layer (this crate)
//!     ↕
//! Dispatch + Protocol (below)
//! ```

#![allow(async_fn_in_trait)]

mod admission;
mod error;
mod ids;
mod link;
mod locale;
pub mod messages;
mod orchestrator;
mod profile;

pub use admission::{Denial, Occupancy, SessionConfig};
pub use error::SessionError;
pub use ids::IdAllocator;
pub use link::{DisconnectReason, PlayerLink};
pub use locale::{EnglishLocalizer, Localizer, keys};
pub use messages::PlayerSnapshot;
pub use orchestrator::{SessionOrchestrator, fan_out};
pub use profile::{InMemoryProfileStore, ProfileIdentity, ProfileRecord, ProfileStore};
