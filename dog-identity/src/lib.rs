// Identity-service seam for DogRS storage drivers.

pub mod core;
pub mod error;
pub mod memory;
pub mod options;
pub mod session;

pub use self::core::*;
pub use error::*;
pub use memory::*;
pub use options::*;
pub use session::*;
