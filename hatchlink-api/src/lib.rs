//! Protocol and data model shared by everything that talks to the
//! incubator controller.

pub mod codec;
pub mod message;
pub mod models;

pub use codec::{CodecError, DecodeError, decode, encode};
pub use message::{Command, Param, Reply};
pub use models::*;
