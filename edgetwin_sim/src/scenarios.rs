//! Session scenarios for deterministic simulation.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// READY handshake, bootstrap, steady ticking
    Handshake,

    /// Physical twin connects long after READY was announced
    LateJoiner,

    /// A second bootstrap arrives while the session runs
    DuplicateBootstrap,

    /// Invalid bootstraps first, then a valid one
    MalformedBootstrap,

    /// A dose on one site turns it from growing to healing
    DrugResponse,

    /// Transport drops out mid-session and comes back
    TransportOutage,

    /// Tick count over a fixed window matches the configured rate
    Cadence,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Handshake,
            ScenarioId::LateJoiner,
            ScenarioId::DuplicateBootstrap,
            ScenarioId::MalformedBootstrap,
            ScenarioId::DrugResponse,
            ScenarioId::TransportOutage,
            ScenarioId::Cadence,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Handshake => "handshake",
            ScenarioId::LateJoiner => "late_joiner",
            ScenarioId::DuplicateBootstrap => "duplicate_bootstrap",
            ScenarioId::MalformedBootstrap => "malformed_bootstrap",
            ScenarioId::DrugResponse => "drug_response",
            ScenarioId::TransportOutage => "transport_outage",
            ScenarioId::Cadence => "cadence",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Handshake => "Twin waits for READY, bootstraps, node ticks every site",
            ScenarioId::LateJoiner => "Twin joins 2s after READY and still sees the retained token",
            ScenarioId::DuplicateBootstrap => "Second bootstrap rejected, first session untouched",
            ScenarioId::MalformedBootstrap => "Bad payloads leave the node idle until a valid one arrives",
            ScenarioId::DrugResponse => "Dosed site heals while the untreated site keeps growing",
            ScenarioId::TransportOutage => "1s bus outage: publishes fail, scheduler keeps its cadence",
            ScenarioId::Cadence => "Tick count within one of duration x rate",
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
        match s.to_lowercase().replace('-', "_").as_str() {
            "handshake" => Ok(ScenarioId::Handshake),
            "late_joiner" | "latejoiner" => Ok(ScenarioId::LateJoiner),
            "duplicate_bootstrap" | "duplicate" => Ok(ScenarioId::DuplicateBootstrap),
            "malformed_bootstrap" | "malformed" => Ok(ScenarioId::MalformedBootstrap),
            "drug_response" | "drug" => Ok(ScenarioId::DrugResponse),
            "transport_outage" | "outage" => Ok(ScenarioId::TransportOutage),
            "cadence" => Ok(ScenarioId::Cadence),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
