pub mod availability;
pub mod comfort;
pub mod greedy;
pub mod recommendation;
pub mod savings;
pub mod types;
pub mod windows;

pub use availability::*;
pub use comfort::*;
pub use recommendation::*;
pub use savings::*;
pub use types::*;
pub use windows::*;
