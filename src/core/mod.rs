pub mod controller;
pub mod crawler;
pub mod dependencies;
pub mod engine;
pub mod ffmpeg;
pub mod filename;
pub mod login;
pub mod manifest;
pub mod process;
pub mod queue;
pub mod session;
pub mod urls;
pub mod ytdlp;
