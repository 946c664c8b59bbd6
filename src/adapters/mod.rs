//! Light controller adapters (Philips Hue)

pub mod hue;
pub mod traits;

pub use hue::HueBridge;
pub use traits::*;
