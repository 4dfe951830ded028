pub mod campaign;
pub mod capture;
pub mod clock;
pub mod command;
pub mod config;
pub mod economy;
pub mod engine;
pub mod error;
pub mod event;
pub mod player;
pub mod presence;
pub mod replication;
pub mod rng;
pub mod save_format;
pub mod save_writer;
pub mod slots;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod zone;
