mod id_utils;
mod time_utils;
mod type_utils;

pub use id_utils::*;
pub use time_utils::*;
pub use type_utils::*;
