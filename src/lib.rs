//! Settings editor core for Enigma2 and Neutrino set-top boxes.
//!
//! Reads and writes service tables (`lamedb`, `services.xml`), bouquets,
//! tuner lists, blacklists and IPTV playlists, and keeps the references
//! between them consistent while they are edited.

pub mod adapter;
pub mod archive;
pub mod blacklist;
pub mod bouquets;
pub mod codec;
pub mod config;
pub mod error;
pub mod hashing;
pub mod iptv;
pub mod jobs;
pub mod lamedb;
pub mod m3u_parser;
pub mod model;
pub mod models;
pub mod neutrino;
pub mod tuners;
pub mod xml;
mod xref;

pub use error::{Diagnostics, Error, InvariantViolation, Result};
pub use model::Model;
