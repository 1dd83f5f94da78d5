//! Serialisation of volumes and extracted meshes.

mod ply;
mod volume;

pub use ply::{write_ply_ascii, write_ply_binary};
pub use volume::{load_volume, read_volume, save_volume, write_volume};
