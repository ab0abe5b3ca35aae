mod common;
pub use self::common::{Function, Query};

mod series;
pub use self::series::{DailyAdjustedQuery, OutputSize};

mod overview;
pub use self::overview::OverviewQuery;
