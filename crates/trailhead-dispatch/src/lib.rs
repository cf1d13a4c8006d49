//! In-process dispatch bus for Trailhead.
//!
//! Producers of a message never call its consumer directly. They hand the
//! message to a [`Dispatcher`], which routes it by type:
//!
//! - **Commands and queries** ([`Request`]): exactly one
//!   [`RequestHandler`] per type. A command is a request whose response is
//!   `()`.
//! - **Notifications** ([`Notification`]): any number of
//!   [`NotificationHandler`]s, run concurrently. [`Dispatcher::publish`]
//!   returns once all of them are done and reports the first failure.
//!
//! Every request (and every publish) passes through an ordered pipeline of
//! [`Stage`]s and per-type [`Behavior`]s before it reaches the handler. See
//! [`pipeline`] for the ordering rules.
//!
//! # Architecture
//!
//! ```text
//! Connection actor ──send/publish──→ Dispatcher ──→ stages ──→ handler(s)
//!                                        │
//!                                  TypeId → RequestSender (built once)
//! ```

mod dispatcher;
mod error;
mod message;
pub mod pipeline;

pub use dispatcher::{Dispatcher, DispatcherBuilder, RequestSender};
pub use error::{BoxError, DispatchError};
pub use message::{
    Notification, NotificationHandler, Published, Request, RequestHandler,
};
pub use pipeline::{Behavior, Next, PostProcessor, PreProcessor, Stage};
