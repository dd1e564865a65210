//! # Storage Module
//!
//! Persistence for the dues core: a SQLite database reached through sqlx, a
//! change feed that stands in for the store's realtime channel, and the small
//! client-side cache used for the payment-session marker.
//!
//! The domain layer depends only on the traits in [`traits`] and on
//! [`LocalCache`], never on the concrete repositories.

pub mod change_feed;
pub mod connection;
pub mod local_cache;
pub mod repositories;
pub mod traits;

pub use change_feed::{ChangeFeed, ChangeKind, ConfigSubscription, ProfileChange, ProfileSubscription, RowChange};
pub use connection::DbConnection;
pub use local_cache::{FileCache, LocalCache, MemoryCache};
pub use repositories::{GlobalConfigRepository, ProfileRepository, SessionRepository, WeeklyDueRepository};
pub use traits::{AuthenticatedUser, GlobalConfigStorage, ProfileStorage, SessionStorage, WeeklyDueStorage};
