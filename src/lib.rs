pub mod config;
pub mod dap;
pub mod debugger;
pub mod interpreter;
pub mod log;
