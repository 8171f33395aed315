pub mod actions;
pub mod config;
pub mod csv_loader;
pub mod dispatcher;
pub mod engine;
pub mod feature_extractor;
pub mod gesture_classifier;
pub mod hid;
pub mod landmark_source;
pub mod mlp;
pub mod recorder;
pub mod types;
