//! png2gif - converts chat attachments into hosted GIFs
//!
//! Each attachment in a batch is fetched, converted to GIF (still images are
//! resized and quantized, animated GIFs normalized, videos run through a
//! two-pass ffmpeg pipeline) and uploaded to the primary storage zone, with a
//! detached copy to an S3-compatible backup bucket. The batch returns the
//! public links plus a failure count.

pub mod app;
pub mod convert;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod models;
pub mod storage;

pub use error::{Error, Result};
