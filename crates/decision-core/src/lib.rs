pub mod error;
pub mod proposal;
pub mod signal;
pub mod snapshot;
pub mod traits;
pub mod types;

pub use error::*;
pub use proposal::*;
pub use signal::*;
pub use snapshot::*;
pub use traits::*;
pub use types::*;
