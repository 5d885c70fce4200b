pub mod models;
pub mod regrid;
pub mod slot_grid;
pub mod status;
pub mod task_codec;
