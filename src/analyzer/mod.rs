//! Signal analysis used by transition synthesis: chroma features, onset
//! envelopes, beat tracking and dynamic time warping, plus the party score
//! that catalog energies come from.

pub mod beats;
pub mod dtw;
pub mod features;
pub mod score;
