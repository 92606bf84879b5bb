//! Hide & Seek Simulation Harness
//!
//! Headless driver for the episode engine in `hideseek_core`. Everything
//! runs deterministically from a single master seed:
//! - **SimWorld**: one arena plus a hider policy and a seeker policy
//! - **Scenarios**: scripted runs that assert the episode rules hold
//! - **Parallel runner**: many independent arenas on a tokio blocking pool
//! - **Exporter**: per-tick JSON frames for offline replay
//!
//! # Usage
//!
//! ```ignore
//! use hideseek_sim::{SimConfig, SimWorld};
//!
//! let mut world = SimWorld::new(SimConfig::default(), 0);
//! let summaries = world.run_episodes(3);
//! ```

pub mod error;
pub mod exporter;
pub mod parallel;
pub mod policies;
pub mod runner;
pub mod scenarios;
pub mod seeds;
pub mod world;

pub use error::SimError;
pub use exporter::{AgentFrame, ObjectFrame, SimExport, SimFrame};
pub use parallel::{run_arena, run_arenas, run_parallel, ArenaReport};
pub use policies::{HeuristicHider, HeuristicSeeker, IdlePolicy, PolicyKind, RandomPolicy};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
pub use seeds::SeedDeriver;
pub use world::{SimConfig, SimWorld, TickReport};
