mod convert;
mod error;

pub use convert::*;
pub use error::*;
