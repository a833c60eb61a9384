pub mod departure;

pub use departure::*;
