//! Actors working on the measurement repository.
//!
//! - [`PagerActor`] answers positional and page queries
//! - [`CacheDumper`] exports the repository as text
//! - [`Poller`] is the single writer, feeding the repository from the meter

pub mod dump;
pub mod pager;
pub mod poller;

pub use dump::CacheDumper;
pub use pager::{PageRequest, PagerActor};
pub use poller::{PollStats, Poller};
