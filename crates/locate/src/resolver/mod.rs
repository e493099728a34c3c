//! Nearest-server resolution.
//!
//! A [`RankingBackend`] proposes candidates; [`QueryResolver`] keeps the live
//! ones and mints an access token for each.

mod ranking;
mod resolve;

pub use ranking::{HttpRanking, MachineEntry, RankingBackend, StaticRanking};
pub use resolve::QueryResolver;
