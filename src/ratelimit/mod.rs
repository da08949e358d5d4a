//! Rate limiting logic and state management.

mod clock;
mod history;
mod janitor;
mod key;
mod limiter;
mod policy;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use history::ClientHistory;
pub use janitor::{Janitor, JanitorConfig, JanitorHandle};
pub use key::ClientKey;
pub use limiter::{Limiter, PruneStats};
pub use policy::{Policy, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECS};
