//! Realtime service
//!
//! `RealtimeService` ties the event store, replay and transports together
//! and exposes them over HTTP:
//!
//! | Route                          | Purpose                          |
//! |--------------------------------|----------------------------------|
//! | `GET /ws`                      | socket protocol                  |
//! | `GET /events`                  | Server-Sent Events stream        |
//! | `GET /sync/:actor_id`          | incremental sync page            |
//! | `GET /actors/:actor_id/state`  | reconstructed state              |
//! | `POST /actors/:actor_id/events`| append and fan out               |
//! | `GET /health`                  | connection counts                |

pub mod api;
pub mod handlers;
pub mod realtime;
pub mod server;
pub mod subscription;
pub mod types;

pub use api::build_router;
pub use realtime::RealtimeService;
pub use server::{serve, RealtimeServer};
pub use subscription::{ChannelSubscription, SubscriptionHub};
