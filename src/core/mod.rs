//! udptun - Core types, constants, and extension points.
//!
//! This module has no runtime dependencies and is always compiled. It
//! defines the wire constants, the layer-independent errors, and the
//! [`PayloadTransform`] hook used by an external secure channel.

mod constants;
mod error;
mod traits;

pub use constants::*;
pub use error::*;
pub use traits::*;
