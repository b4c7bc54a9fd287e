//! Domain core for the render-engine relay.
//!
//! Pure data types and transformations with no I/O: job document decoding,
//! pre-submission mutation, progress estimation, the session model and the
//! normalized events pushed to browser clients.

pub mod document;
pub mod error;
pub mod events;
pub mod image;
pub mod mutation;
pub mod progress;
pub mod session;
pub mod types;
