// #![warn(missing_docs)]

//! Projective texturing of calibrated multi-camera panoramic captures.
//!
//! A capture platform carries a rig of calibrated cameras and fires them
//! simultaneously at a sequence of stations. This crate models the rig
//! calibration, the transform chain from geocentric world coordinates down
//! to each sensor's texture plane, the nearest-station streaming state
//! machine, and the generated program that composites the overlapping
//! sensor projections with soft seams.
//!
//! The rendering engine, asset transport, and camera controls stay outside:
//! they are reached through the [`texture::ImageFetcher`] and
//! [`geo::Reprojector`] seams and consume the generated
//! [`shader::ProgramSource`] plus the per-sensor matrices the layer keeps
//! up to date.

#[allow(missing_docs)]
pub mod error;

pub mod calibration;
pub mod frame;
pub mod geo;
pub mod layer;
pub mod shader;
pub mod station;
pub mod streaming;
pub mod texture;
