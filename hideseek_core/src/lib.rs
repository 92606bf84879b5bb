//! Hide & Seek Core - Episode Simulation Engine
//!
//! Two teams act in fixed ticks inside a walled arena with boxes and ramps.
//! Hiders are rewarded for staying out of sight, seekers for keeping hiders
//! in sight. This crate owns the rules:
//! 1. **Episode state machine** (`episode`): grace period, capture, win conditions, reset
//! 2. **Visibility** (`visibility`): distance/angle/occlusion line of sight with a pair cache
//! 3. **Reward shaping** (`reward`): visibility, activity, exploration, coordination
//! 4. **Object interaction** (`interaction`): grab, hold, lock, unlock
//! 5. **Encoding** (`encoding`): fixed-size observation vectors and action decoding
//!
//! Physics and policies are collaborators defined in `hideseek_env`.

pub mod config;
pub mod encoding;
pub mod entity;
pub mod episode;
pub mod error;
pub mod interaction;
pub mod metrics;
pub mod reward;
pub mod spawn;
pub mod visibility;

pub use config::ArenaConfig;
pub use encoding::{AgentAction, ObservationEncoder, ObservationLayout, ACTION_SIZE};
pub use entity::{Agent, GrabbableObject, ObjectKind, ObjectState, Roster};
pub use episode::{Arena, EpisodeEvent, EpisodePhase, EpisodeState, StepOutcome};
pub use error::ConfigError;
pub use interaction::{GrabOutcome, InteractionSystem, LockOutcome, LockRejection};
pub use metrics::{EpisodeMetrics, EpisodeSummary};
pub use reward::{RewardBreakdown, RewardShaper};
pub use visibility::{Sightings, VisibilityEngine};
