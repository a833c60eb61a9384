pub mod anomaly;
pub mod charge;
pub mod settings;
pub mod trip;
pub mod types;
pub mod validation;

pub use anomaly::*;
pub use charge::*;
pub use settings::*;
pub use trip::*;
pub use types::*;
pub use validation::ValidationError;
