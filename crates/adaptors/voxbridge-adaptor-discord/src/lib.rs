//! Voxbridge Discord adaptor
//!
//! Joins guild voice channels and bridges them to the voxbridge backend:
//! captured speech becomes `audio_input` frames, synthesized replies are
//! played back into the channel.
//!
//! The bridge logic ([`VoiceBridge`]) only needs a [`VoiceGateway`] and a
//! [`BackendConnector`], so it runs without Discord in tests. The `voice`
//! feature adds the serenity/songbird implementation and the `voxbridge`
//! binary.
//!
//! Text commands (default prefix `!`):
//! - `join` joins the caller's voice channel
//! - `leave` leaves it
//! - `status` reports the session state

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod capture;
pub mod connector;
pub mod gateway;
#[cfg(feature = "voice")]
pub mod handler;
#[cfg(feature = "voice")]
pub mod voice;

pub use bridge::VoiceBridge;
pub use capture::CaptureBuffer;
pub use connector::{BackendConnector, BackendLink, WebSocketConnector};
pub use gateway::VoiceGateway;
#[cfg(feature = "voice")]
pub use handler::{start_discord, DiscordBridge, Handler};
#[cfg(feature = "voice")]
pub use voice::{CapturedAudio, SongbirdGateway};
