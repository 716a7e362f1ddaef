//! Face2 clinical photo pipeline
//!
//! Takes one or two before/after photos, renders a versioned policy prompt,
//! calls a Gemini image model and assembles a fixed-layout composite, falling
//! back to a deterministic local image pipeline when the model is unavailable.
//! Previously generated images are never accepted as inputs.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
