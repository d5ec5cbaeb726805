pub mod channel;
pub mod counters;
pub mod persist;
pub mod store;
pub mod throttle;

pub use channel::{Channel, UserInfo, DEFAULT_TOGGLES};
pub use counters::{Counters, COUNTER_CATEGORIES};
pub use persist::{PersistError, Persistence};
pub use store::{ChannelStore, RepairReport, ToggleChange};
pub use throttle::{Clock, ManualClock, SystemClock};
