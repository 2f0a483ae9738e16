//! Utility modules for encore-ce

pub mod audio_decoder;
pub mod db_retry;

pub use audio_decoder::{decode_audio_bytes, sniff_audio_type, DecodeError};
pub use db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
