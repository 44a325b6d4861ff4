pub mod bandpass;
