//! JSON frame exporter.
//!
//! Records arena snapshots tick by tick so a run can be replayed or plotted
//! offline.

use crate::error::SimError;

use hideseek_core::{Agent, Arena, EpisodeEvent, EpisodeSummary, GrabbableObject, ObjectKind, ObjectState};
use hideseek_env::{PhysicsBackend, Team};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize)]
pub struct SimFrame {
    /// Harness tick, counted across episodes
    pub tick: u64,

    pub episode: u64,

    /// Step within the episode after this tick
    pub step: u64,

    pub grace_period: bool,

    pub agents: Vec<AgentFrame>,

    pub objects: Vec<ObjectFrame>,

    /// Events emitted during this tick
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EpisodeEvent>,
}

impl SimFrame {
    /// Snapshots `arena` after a tick.
    pub fn capture<P: PhysicsBackend>(
        tick: u64,
        arena: &Arena<P>,
        rewards: &[f32],
        events: Vec<EpisodeEvent>,
    ) -> Self {
        let state = arena.state();
        let roster = arena.roster();
        Self {
            tick,
            episode: state.episode,
            step: state.current_step,
            grace_period: state.is_grace_period,
            agents: roster
                .agents
                .iter()
                .enumerate()
                .map(|(i, agent)| {
                    AgentFrame::new(agent, rewards.get(i).copied().unwrap_or(0.0))
                })
                .collect(),
            objects: roster.objects.iter().map(ObjectFrame::new).collect(),
            events,
        }
    }
}

/// Agent snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct AgentFrame {
    pub id: u32,
    pub team: Team,
    pub x: f32,
    pub y: f32,
    pub z: f32,

    /// Heading in radians, 0 facing +Z
    pub yaw: f32,

    pub active: bool,
    pub frozen: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_object: Option<u32>,

    /// Reward received this tick
    pub reward: f32,

    pub cumulative_reward: f32,
}

impl AgentFrame {
    pub fn new(agent: &Agent, reward: f32) -> Self {
        let p = agent.position();
        Self {
            id: agent.id.0,
            team: agent.team,
            x: p.x,
            y: p.y,
            z: p.z,
            yaw: agent.pose.forward.x.atan2(agent.pose.forward.z),
            active: agent.active,
            frozen: agent.frozen,
            held_object: agent.held_object.map(|o| o.0),
            reward,
            cumulative_reward: agent.cumulative_reward,
        }
    }
}

/// Object snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectFrame {
    pub id: u32,
    pub kind: ObjectKind,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub state: ObjectState,
}

impl ObjectFrame {
    pub fn new(object: &GrabbableObject) -> Self {
        let p = object.position();
        Self {
            id: object.id.0,
            kind: object.kind,
            x: p.x,
            y: p.y,
            z: p.z,
            state: object.state,
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    /// Scenario or run name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Seconds per tick
    pub tick_seconds: f32,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Episodes finished during the run
    pub episodes: Vec<EpisodeSummary>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64, tick_seconds: f32) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            tick_seconds,
            frames: Vec::new(),
            episodes: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Adds a frame, collecting any episode summaries among its events.
    pub fn add_frame(&mut self, frame: SimFrame) {
        for event in &frame.events {
            if let EpisodeEvent::EpisodeFinished { summary } = event {
                self.episodes.push(summary.clone());
            }
        }
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames.len() as f64 * self.tick_seconds as f64
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
