//! HueTV - Rust Implementation
//!
//! Projects the most common webcam color onto Philips Hue lights.
//!
//! This library provides:
//! - Hue bridge discovery over SSDP multicast
//! - Frame capture from a webcam (OpenCV, `camera` feature) or a still image
//! - Dominant hue extraction and smoothing
//! - A Hue bridge REST adapter
//! - The capture/extract/apply control loop

// =============================================================================
// Lints - Enforce code quality and consistency
// =============================================================================

// Deny truly dangerous patterns (these will fail the build)
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod adapters;
pub mod capture;
pub mod color;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod smoothing;

/// A single hue value in the bridge's native range (0-65535)
pub type HueSample = u16;
