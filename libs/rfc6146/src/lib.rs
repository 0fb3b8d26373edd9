#![doc = include_str!("../README.md")]

pub mod error;

mod arena;
mod bib;
mod expiry;
mod session;
mod table;
mod types;

pub use bib::{BibEntry, BibId};
pub use expiry::PurgeReport;
pub use session::{SessionEntry, SessionId};
pub use table::StateTable;
pub use types::{Ipv4Endpoint, Ipv4Pair, Ipv6Endpoint, Ipv6Pair, L4Proto, Tuple4};
