pub mod bandpass;

pub use bandpass::{BandPassFilter, BandPassFilterConfig};
