pub mod diff;
pub mod distance;
pub mod export;
pub mod fetch;
pub mod metrics;
pub mod pipeline;
pub mod select;
pub mod sink;
pub mod snapshot;
