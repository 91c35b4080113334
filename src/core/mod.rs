pub mod browser;
pub mod jobs;
pub mod renderer;
pub mod sink;
pub mod storage;
