//! # Domain Layer
//!
//! Business logic of the dues core, independent of HTTP and SQL:
//!
//! - [`payment_monitor`]: expiry-driven reversion of pending payments
//! - [`billing_config_store`]: client-side sync of the billing range
//! - [`billing_range_service`] and [`dues_service`]: the server-side operations
//!   behind the REST endpoints
//!
//! Collaborators (clock, session, notices) are passed in explicitly.

pub mod billing_config_store;
pub mod billing_range_service;
pub mod clock;
pub mod dues_service;
pub mod errors;
pub mod notifications;
pub mod payment_monitor;
pub mod session;

pub use billing_config_store::{BillingConfigSnapshot, BillingConfigStore, ConfigStoreError, StoreOptions};
pub use billing_range_service::BillingRangeService;
pub use clock::{Clock, SystemClock};
pub use dues_service::DuesService;
pub use errors::DomainError;
pub use notifications::{ChannelNotifier, LogNotifier, Notice, NoticeLevel, Notifier};
pub use payment_monitor::{MonitorOptions, MonitorState, PaymentLifecycleMonitor, PaymentReverter};
pub use session::{CurrentRoute, Session, SessionHandle};
