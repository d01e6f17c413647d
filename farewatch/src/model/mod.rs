pub mod offer;
pub mod owner;
pub mod watch;

pub use offer::{Airport, Offer, Price, SearchFilters, SearchQuery, Stop};
pub use owner::{BestDeal, NotificationDefaults, Owner, QuietHours};
pub use watch::{
    BestPrice, DateRange, FlightType, NotificationPolicy, Watch, WatchStats,
};
