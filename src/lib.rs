//! HitDetect extracts point-like "hit" events from the frames of an
//! ion/particle imaging camera. Given a frame, HitDetect returns the list of
//! hits found in it, and adds each hit to a running composite image that
//! builds up a long-exposure picture of where events land on the detector.
//!
//! Features:
//!
//! * Accepts frames of any common sample type (8/16/32 bit integers,
//!   floats), single channel or 3-channel color.
//! * Fixed or adaptive (local mean) thresholding.
//! * Reports centroid, area and a roundness measure for every hit, with
//!   configurable size and area windows for rejecting noise and clutter.
//! * Composite accumulator owned by the caller; no hidden state.
//!
//! # Algorithm
//!
//! Each frame goes through the following stages:
//!
//! 1. Normalization to 8-bit grayscale. See
//!    [image_funcs::normalize_frame()].
//! 2. Binarization against a fixed threshold, or against the mean of each
//!    pixel's neighborhood. See [image_funcs::binarize()].
//! 3. Tracing of the outer boundary of every connected bright region.
//!    Holes, and anything inside them, are ignored. See
//!    [contour_funcs::find_boundary_curves()].
//! 4. For each boundary: computing its moments, area, perimeter and
//!    roundness, then rejecting it if it has too few vertices, encloses no
//!    area, falls outside the configured area window, or has its centroid
//!    off the frame.
//! 5. Each surviving boundary becomes a [algorithm::Hit] and bumps the
//!    composite accumulator at its centroid.
//!
//! Rejected candidates are simply dropped; only malformed input (a frame
//! with an unsupported shape, or an accumulator sized for a different frame)
//! is an error.
//!
//! # The composite accumulator
//!
//! The accumulator is an 8-bit image whose cells count hits. Counts wrap
//! around: a cell at 255 goes to 0 on its next hit. This matches the
//! instrument's existing composite images.
//!
//! [algorithm::extract_hits()] takes the accumulator by `&mut`, so within one
//! thread the borrow checker guarantees a single writer. When an acquisition
//! thread feeds frames while another thread displays the composite, keep the
//! accumulator behind a mutex and hold the lock both while calling
//! [algorithm::extract_hits()] and while reading the composite. The
//! `hit-detect-server` binary does exactly this.
//!
//! To persist a composite across restarts, save its raw bytes
//! (`GrayImage::into_raw()`) along with its width and height.
//!
//! # Caveats
//!
//! ## Centroid precision
//!
//! Hit centroids are integer pixel coordinates derived from the boundary
//! polygon, not intensity weighted. Applications wanting sub-pixel positions
//! should do their own centroiding around each reported hit.
//!
//! ## Area and roundness of small hits
//!
//! Boundaries pass through pixel centers, so a hit's area is smaller than its
//! pixel count: a 2x2 blob has area 1 and a single pixel has area 0 (and is
//! therefore never reported). Likewise digital disks have a roundness of
//! roughly 2 rather than 0, since their outlines are staircases.

pub mod algorithm;
pub mod config;
pub mod contour_funcs;
pub mod error;
pub mod frame;
pub mod image_funcs;

pub use algorithm::{extract_hits, extract_hits_with_new_accumulator,
                    new_accumulator, reset_accumulator, Hit, HitExtraction};
pub use config::ContourConfig;
pub use error::{ConfigError, HitError};
pub use frame::{ChannelOrder, Frame, Sample};
