//! Wire protocol for the burrow DNS tunnel.
//!
//! Every message on the tunnel is one binary WebSocket frame of the form
//! `nonce(12) ‖ AES-256-GCM(frame)`, where the sealed frame uses the
//! fixed-header layout implemented in [`Frame`].

mod crypto;
mod error;
mod frame;

pub use crypto::{generate_salt, Envelope, KEY_LEN, NONCE_LEN, PBKDF2_ROUNDS, SALT_LEN};
pub use error::{Error, Result};
pub use frame::{Frame, Kind, FRAME_HDR_LEN};
