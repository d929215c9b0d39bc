//! Multi-source dashboard for session-sync.
//!
//! [`DashboardAggregator`] fetches every [`DashboardSource`] concurrently and
//! publishes one combined [`DashboardSnapshot`]:
//!
//! - a failed source falls back to its declared default; the snapshot reports
//!   it through [`DashboardSnapshot::partial_failure`] instead of failing;
//! - results of a refresh overtaken by a newer one, or by a session change,
//!   are dropped;
//! - mutation notices are debounced into one follow-up refresh;
//! - a polling loop refreshes in the background and pauses while the
//!   connection is degraded.
//!
//! ## Example
//!
//! ```ignore
//! let dashboard = DashboardAggregator::new(session, transport, AggregatorConfig::default());
//! dashboard.start();
//! dashboard.notify_mutation("movement_created", json!({ "product_id": 4 }));
//! ```

mod aggregator;
mod snapshot;
mod source;

pub use aggregator::{AggregatorConfig, DashboardAggregator};
pub use snapshot::{
    DashboardSnapshot, DegradationPolicy, PartialFetchFailure, RefreshReason, SourceValue,
};
pub use source::{default_sources, DashboardSource};
