mod common;
mod dap_engine;
mod server;
