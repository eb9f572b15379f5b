pub mod format;
pub mod source;
pub mod tone;
pub mod wav;

#[cfg(feature = "cpal-audio")]
pub mod capture;
#[cfg(feature = "cpal-audio")]
pub mod playback;
