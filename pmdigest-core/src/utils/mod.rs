pub mod budget;
pub mod rate;

pub use budget::ContentBudgeter;
pub use rate::RateEstimator;
