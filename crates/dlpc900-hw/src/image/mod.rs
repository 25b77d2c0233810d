//! Pattern images and the Enhanced-RLE bitmap format.
//!
//! Single-bit patterns are packed 24 at a time into a three-channel
//! composite, which is the unit the controller stores and compresses.

mod bitplane;
mod composite;

pub mod rle;

pub use bitplane::{BitPlane, PIXEL_COUNT};
pub use composite::{compose, Composite};
pub use rle::{decode, encode, EncodedBitmap};
