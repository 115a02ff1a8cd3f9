pub mod into_stream;
pub mod join;
pub mod retry;
pub mod skip_until;
pub mod subscribe_on;
