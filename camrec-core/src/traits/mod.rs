pub mod command_builder;
pub mod delegate;
pub mod disk_probe;
pub mod health_probe;
pub mod process_spawner;
