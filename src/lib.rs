#![doc = include_str!("../README.md")]

pub use bytes;

pub use client::*;
pub use model::*;
pub use options::*;
pub use request::*;
pub use search::{SearchResults, SearchState};

pub(crate) mod channel;
pub(crate) mod conn;

pub mod ber;
pub mod client;
pub mod codec;
pub mod controls;
pub mod error;
pub mod filter;
pub mod message;
pub mod model;
pub mod msgid;
pub mod options;
pub mod queue;
pub mod request;
pub mod search;
pub mod url;
