//! Agent card — discovery metadata served at `/.well-known/agent.json`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCard {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub capabilities: AgentCapabilities,
    /// Agents reachable through this server, in the scope the persona
    /// allows (exposed subset publicly, everything internally).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<AgentCardSkill>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCapabilities {
    pub streaming: bool,
}

/// One callable agent advertised on the card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCardSkill {
    pub name: String,
    pub description: String,
}

impl AgentCard {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION.into(),
            name: name.into(),
            description: description.into(),
            version: env!("CARGO_PKG_VERSION").into(),
            capabilities: AgentCapabilities { streaming: true },
            skills: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_advertises_streaming_and_version() {
        let card = AgentCard::new("shaman", "agent orchestration");
        let wire = serde_json::to_value(&card).unwrap();
        assert_eq!(wire["protocolVersion"], "0.3.0");
        assert_eq!(wire["capabilities"]["streaming"], true);
        assert!(wire.get("skills").is_none());
    }
}
