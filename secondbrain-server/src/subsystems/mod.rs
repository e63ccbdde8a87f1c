pub mod query;
pub mod retrieve;
pub mod weather;
