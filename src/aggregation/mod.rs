pub mod flush;
pub mod watchdog;
pub mod window;

pub use flush::{flush_stats, FlushReport, StatSink};
pub use watchdog::{IdleWatchdog, Liveness};
pub use window::AggregationWindow;
