//! Chat listener: keeps a connection to a Twitch chat channel alive and plays
//! a sound when a message contains a configured trigger phrase.

pub mod action;
pub mod audio;
pub mod backoff;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod observer;
pub mod playback;

#[cfg(test)]
mod testing;
