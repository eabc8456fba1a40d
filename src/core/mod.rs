//! Core types, FFT plumbing, window functions and the analysis ring buffer.

pub mod fft;
pub mod ring_buffer;
pub mod types;
pub mod window;

pub use fft::{Fft, COMPLEX_ONE, COMPLEX_ZERO};
pub use ring_buffer::RingBuffer;
pub use types::*;
pub use window::{apply_window, generate_window, window_energy, WindowType};
