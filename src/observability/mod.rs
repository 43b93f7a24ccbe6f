//! Observability for the optimizer
//!
//! - Structured JSON line logging with a process-wide severity floor
//! - Typed lifecycle events
//! - Monotonic counters
//!
//! Observability never influences planning or rewriting decisions.
//!
//! ```ignore
//! use filteropt::observability::{log_event_with_fields, Event};
//!
//! log_event_with_fields(Event::PlanBuilt, &[("strategy", "hybrid")]);
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use scope::{ObservationScope, Timer};

/// Log an event at its own severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log an event with fields at its own severity
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
