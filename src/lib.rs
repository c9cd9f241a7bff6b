pub mod analytics;
pub mod config;
pub mod connectors;
pub mod db;
pub mod error;
pub mod format;
pub mod hash;
pub mod metrics;
pub mod notifications;
pub mod scheduler;
pub mod server;
pub mod sync;
pub mod torrents;
pub mod webhook;

pub use analytics::PlaybackReconciler;
pub use config::Config;
pub use connectors::{Connectors, ServiceKind};
pub use db::Db;
pub use error::{ArrboardError, Result};
pub use notifications::NotificationService;
pub use scheduler::Scheduler;
pub use server::AppState;
pub use sync::{SyncService, SyncTarget};
