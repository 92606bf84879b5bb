//! Policy collaborator abstraction.

use crate::types::{AgentId, EpisodeOutcome, Team};

/// Produces actions from observations.
///
/// A learning system implements this to drive agents; the harness ships
/// scripted implementations. One instance may serve several agents, so every
/// call names the agent it is for.
pub trait Policy: Send {
    /// Returns the action vector for `agent` given its observation.
    ///
    /// The vector may be any length; the engine zero-fills missing channels
    /// and clamps out-of-range values.
    fn act(&mut self, agent: AgentId, team: Team, observation: &[f32]) -> Vec<f32>;

    /// Called once per agent when an episode ends, before the arena resets.
    ///
    /// # Arguments
    /// * `agent` - The agent whose episode ended
    /// * `outcome` - Why the episode ended
    /// * `cumulative_reward` - Total reward the agent collected, terminal reward included
    fn episode_ended(&mut self, _agent: AgentId, _outcome: EpisodeOutcome, _cumulative_reward: f32) {}

    /// Returns the policy name (for logging).
    fn name(&self) -> &str;
}
