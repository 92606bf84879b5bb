//! Harness scenarios with assertions.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Seekers stay frozen for exactly the grace window
    GracePeriod,

    /// Idle seekers, every episode ends on the step budget
    Timeout,

    /// Capture radius covers the arena, seekers win on the first live tick
    CaptureRush,

    /// Pillars block sight lines, occlusion metrics stay in range
    Shelter,

    /// Random policies with capture on, invariants hold every tick
    Chaos,

    /// One hider against one seeker
    Solo,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::GracePeriod,
            ScenarioId::Timeout,
            ScenarioId::CaptureRush,
            ScenarioId::Shelter,
            ScenarioId::Chaos,
            ScenarioId::Solo,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::GracePeriod => "grace_period",
            ScenarioId::Timeout => "timeout",
            ScenarioId::CaptureRush => "capture_rush",
            ScenarioId::Shelter => "shelter",
            ScenarioId::Chaos => "chaos",
            ScenarioId::Solo => "solo",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::GracePeriod => "Seekers frozen for the grace window, released on its last tick",
            ScenarioId::Timeout => "Idle seekers, hiders win every episode on the step budget",
            ScenarioId::CaptureRush => "Arena-wide capture radius, seekers win right after grace",
            ScenarioId::Shelter => "Occluding pillars, sightings and occlusion stay consistent",
            ScenarioId::Chaos => "Random actions with capture enabled, invariants every tick",
            ScenarioId::Solo => "1v1 match, coordination reward never fires",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "grace_period" | "grace" => Ok(ScenarioId::GracePeriod),
            "timeout" => Ok(ScenarioId::Timeout),
            "capture_rush" | "capture" => Ok(ScenarioId::CaptureRush),
            "shelter" => Ok(ScenarioId::Shelter),
            "chaos" => Ok(ScenarioId::Chaos),
            "solo" | "1v1" => Ok(ScenarioId::Solo),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
