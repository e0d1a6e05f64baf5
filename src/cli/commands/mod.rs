pub mod config;
pub mod plugin;
pub mod run;
pub mod runs;
pub mod tools;
