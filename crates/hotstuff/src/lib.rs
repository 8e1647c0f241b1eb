//! HotStuff voting core.
//!
//! One [`HeightDataPackage`] collects the votes of a single
//! (view, round); the [`HotStuffState`] wrapper advances views and
//! rounds, replacing the package so late votes for past slots fall on
//! the floor.

mod height_data;
mod state;

pub use height_data::{HeightDataPackage, VoteError};
pub use state::HotStuffState;
