mod error;
mod read;
mod write;

pub use error::*;
pub use read::*;
pub use write::*;
