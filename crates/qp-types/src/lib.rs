pub mod errors;
pub mod money;
pub mod scenario;
pub mod snapshot;

pub use errors::*;
pub use money::*;
pub use scenario::*;
pub use snapshot::*;
