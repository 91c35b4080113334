pub mod jobs;
pub mod sessions;
pub mod system;
pub mod vehicles;
