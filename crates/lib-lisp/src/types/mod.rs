mod addr;
mod lcaf;
mod locator;
mod mapping;
mod message;
mod record;

pub use addr::*;
pub use lcaf::*;
pub use locator::*;
pub use mapping::*;
pub use message::*;
pub use record::*;
