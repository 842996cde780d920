//! Association and location engine
//!
//! **Module Structure:**
//! - `core.rs`: Engine struct, construction, clock, statistics, reset
//! - `intake.rs`: Pick and amplitude intake, pick filters, processing order
//! - `associate.rs`: Binding picks to live origins
//! - `nucleate.rs`: Grid-search nucleation and the XXL fast path
//! - `depth.rs`: Depth policy
//! - `quality.rs`: Rework loop, residual trimming, exclusions, fake test, filters
//! - `lifecycle.rs`: Store, merge, publication and cleanup
//! - `manual.rs`: Manual and imported origins

mod associate;
mod core;
mod depth;
mod intake;
mod lifecycle;
mod manual;
mod nucleate;
mod quality;
#[cfg(test)]
mod testing;

pub use self::core::{Collaborators, DepthRegion, Engine, EngineStats, PublicationState};
