use super::common::{Function, Query};

/// Query for the `OVERVIEW` company fundamentals endpoint.
#[derive(Clone, Debug)]
pub struct OverviewQuery {
    pub symbol: String,
}

impl OverviewQuery {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
        }
    }
}

impl Query for OverviewQuery {
    fn function(&self) -> Function {
        Function::Overview
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }
}
