//! Reelcut Timeline Model
//!
//! Defines the data contracts the playback and export engines consume:
//! - **Visual items:** the ordered video/image sequence, one active at a time
//! - **Audio tracks:** background music and narration clips placed on the timeline
//! - **Captions:** timed text with bulk settings and per-caption overrides
//! - **Fades:** linear envelopes shared by pixels and gain
//!
//! All times are in seconds. Cumulative item offsets are always derived
//! from durations, never stored.

pub mod audio;
pub mod caption;
pub mod fade;
pub mod item;
pub mod timeline;

pub use audio::*;
pub use caption::*;
pub use fade::*;
pub use item::*;
pub use timeline::*;
