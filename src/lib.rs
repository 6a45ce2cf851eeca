pub mod character;
pub mod config;
pub mod error;
pub mod memory;
pub mod pipeline;
pub mod progress;
pub mod quality;
pub mod reference;
pub mod segmenter;
pub mod terminology;
pub mod textutil;
pub mod translate;
