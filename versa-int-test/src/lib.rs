pub mod service;
pub mod test_util;
