//! Service layer of Rollar.
//! - `storage`: key-value persistence over sqlite, postgres or mysql.
//! - `scheduler`: background timer running recurring jobs.
//! - `versions`: component version registry refreshed on a schedule.
//! - `app`: the application object wiring them together.

pub mod errors;
pub mod storage;
pub mod scheduler;
pub mod versions;
pub mod app;
#[cfg(test)]
pub mod test_support;
