pub mod runner;
pub mod test_utils;
