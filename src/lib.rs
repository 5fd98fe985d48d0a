pub mod batch;
pub mod cli;
pub mod core;
pub mod formatter;
pub mod logging;
