pub mod analysis;
pub mod chord;
pub mod click;
pub mod client;
pub mod config;
pub mod extract;
pub mod input;
pub mod media;
pub mod model;
pub mod playback;
pub mod prompt;
pub mod recorder;
pub mod report;
pub mod retry;
pub mod session;
pub mod simplify;
pub mod timeline;

/// Application name for XDG paths
pub const APP_NAME: &str = "chordia";
