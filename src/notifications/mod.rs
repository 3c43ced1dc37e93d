//! Alert Notification System
//!
//! Delivery routing for accepted alerts. The alert engine hands every new
//! alert to an [`AlertNotifier`], which fans it out to registered sinks.
//!
//! # Architecture
//!
//! - **AlertSink**: an opaque delivery mechanism (log, broadcast, callback)
//! - **NotificationConfig**: recipient preferences attached to a sink
//! - **AlertNotifier**: filtering, timeouts, panic isolation and statistics
//!
//! # Example Usage
//!
//! ```no_run
//! use plugmon::notifications::{AlertNotifier, LogSink};
//! use std::sync::Arc;
//!
//! let notifier = AlertNotifier::new();
//! notifier.register_sink(Arc::new(LogSink::new())).unwrap();
//! ```

pub mod traits;
pub mod manager;
pub mod sinks;
pub mod error;


pub use manager::{AlertNotifier, DispatchReport, SinkStats};
pub use traits::{AlertSink, Channel, DeliveryStats, NotificationConfig, QuietHours};
pub use sinks::{BroadcastSink, CallbackSink, LogSink};
pub use error::{NotificationError, NotificationResult};
