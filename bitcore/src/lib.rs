//! `bitcore`: a from-scratch, portable implementation of the Git object and
//! transfer layer — content-addressable object store, packfile codec,
//! ref layer, history operations, merge engine, and smart-HTTP wire
//! protocol.
//!
//! The crate is layered leaves-first (see each module's docs for where it
//! sits): [`hash`]/[`io`] ground out everything else, [`obj`] builds the
//! object model on top, [`odb`] is the object-store façade over loose and
//! packed storage, [`refs`] is the ref layer, [`history`] and [`merge`] are
//! the commit/tree level operations, and [`wire`] is the smart-HTTP
//! negotiation protocol.

#[macro_use]
extern crate anyhow;

#[macro_use]
extern crate bitflags;

#[macro_use]
extern crate log;

#[macro_use]
mod macros;

pub mod config;
pub mod error;
pub mod hash;
pub mod history;
pub mod io;
pub mod lockfile;
pub mod merge;
pub mod obj;
pub mod odb;
pub mod pack;
pub mod refs;
pub mod repo;
pub mod serialize;
pub mod signature;
pub mod time;
pub mod wire;
pub mod xdiff;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{BitError, BitGenericError, BitResult};
pub use repo::Repo;
