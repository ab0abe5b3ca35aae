mod daily;
pub use self::daily::{
    DailyAdjustedResponse, DailyBar, MetaData, TimeSeries, FIELD_LABELS, TIME_SERIES_KEY,
};

mod overview;
pub use self::overview::CompanyOverview;
