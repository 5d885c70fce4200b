pub mod bootstrap;
pub mod clock;
pub mod commands;
pub mod day_boundary;
pub mod day_record_store;
pub mod schedule_config;
pub mod view_sync;
