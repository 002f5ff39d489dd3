//! Conversion attribution engine.
//!
//! Decides whether a previously served, viewed, or clicked ad should be
//! credited with a conversion when the user lands on a matching page, and
//! schedules a privacy-delayed, persisted queue entry that eventually
//! fires the conversion report.

pub mod engine;
pub mod filter;
pub mod id_extractor;
pub mod observer;
pub mod policy;
pub mod queue;
pub mod stores;
pub mod url_pattern;

pub use engine::ConversionEngine;
pub use observer::{ConversionObserver, ObserverList};
pub use queue::ConversionQueueScheduler;
