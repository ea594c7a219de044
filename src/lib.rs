mod env;
mod log;
mod reporter;

pub use reporter::start_reporter;
