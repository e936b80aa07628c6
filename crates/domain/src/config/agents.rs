use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How much run context an agent sees when its step starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextScope {
    /// Prepend a snapshot of all run-data to the conversation.
    #[default]
    Full,
    /// No shared context.
    None,
    /// Only keys the agent asks for via run-data tools.
    Specific,
}

/// Which tools of an MCP server an agent may call.
///
/// On the wire this is `"*"` (everything), an explicit tool-name list, or
/// `null` (no access through this server).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSelection {
    All,
    Named(Vec<String>),
    None,
}

impl ToolSelection {
    pub fn allows(&self, tool: &str) -> bool {
        match self {
            ToolSelection::All => true,
            ToolSelection::Named(names) => names.iter().any(|n| n == tool),
            ToolSelection::None => false,
        }
    }
}

impl Serialize for ToolSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ToolSelection::All => serializer.serialize_str("*"),
            ToolSelection::Named(names) => names.serialize(serializer),
            ToolSelection::None => serializer.serialize_unit(),
        }
    }
}

impl<'de> Deserialize<'de> for ToolSelection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Null => Ok(ToolSelection::None),
            Value::String(s) if s == "*" => Ok(ToolSelection::All),
            Value::Array(items) => {
                let names = items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(name) => Ok(name),
                        other => Err(serde::de::Error::custom(format!(
                            "tool names must be strings, got {other}"
                        ))),
                    })
                    .collect::<Result<Vec<String>, D::Error>>()?;
                Ok(ToolSelection::Named(names))
            }
            other => Err(serde::de::Error::custom(format!(
                "expected \"*\", a tool-name list, or null, got {other}"
            ))),
        }
    }
}

/// Mapping from MCP server name to the agent's tool selection on it.
///
/// Declaration order is preserved and meaningful: tool routing tries the
/// servers in this order and the first whose selection covers the tool
/// wins. A repeated server name replaces the earlier entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct McpServerMap(Vec<(String, ToolSelection)>);

impl McpServerMap {
    pub fn insert(&mut self, server: impl Into<String>, selection: ToolSelection) {
        let server = server.into();
        match self.0.iter_mut().find(|(name, _)| *name == server) {
            Some((_, existing)) => *existing = selection,
            None => self.0.push((server, selection)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ToolSelection)> {
        self.0.iter().map(|(name, selection)| (name.as_str(), selection))
    }

    pub fn get(&self, server: &str) -> Option<&ToolSelection> {
        self.0
            .iter()
            .find(|(name, _)| name == server)
            .map(|(_, selection)| selection)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for McpServerMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (server, selection) in &self.0 {
            map.serialize_entry(server, selection)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for McpServerMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MapVisitor;

        impl<'de> Visitor<'de> for MapVisitor {
            type Value = McpServerMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map from server name to tool selection")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut servers = McpServerMap::default();
                while let Some((server, selection)) =
                    access.next_entry::<String, ToolSelection>()?
                {
                    servers.insert(server, selection);
                }
                Ok(servers)
            }
        }

        deserializer.deserialize_map(MapVisitor)
    }
}

/// A resolved agent definition.
///
/// Agent names are matched verbatim; namespace prefixes such as
/// `myrepo/feature/agent` are ordinary name characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub system_prompt: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default = "d_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub context_scope: ContextScope,
    #[serde(default)]
    pub mcp_servers: McpServerMap,
    /// Agents this one may call. Empty = deny all; a `"*"` entry = any.
    #[serde(default)]
    pub allowed_agents: Vec<String>,
    /// Whether the public discovery endpoint lists this agent.
    #[serde(default)]
    pub exposed: bool,
}

impl AgentDefinition {
    /// Whether this agent may call `target` recursively.
    pub fn may_call(&self, target: &str) -> bool {
        self.allowed_agents
            .iter()
            .any(|a| a == "*" || a == target)
    }
}

fn d_max_iterations() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn agent(allowed: &[&str]) -> AgentDefinition {
        AgentDefinition {
            name: "A".into(),
            description: String::new(),
            version: None,
            system_prompt: "You are A.".into(),
            model: "gpt-4o".into(),
            temperature: None,
            max_iterations: d_max_iterations(),
            context_scope: ContextScope::Full,
            mcp_servers: McpServerMap::default(),
            allowed_agents: allowed.iter().map(|s| s.to_string()).collect(),
            exposed: false,
        }
    }

    #[test]
    fn empty_allowed_agents_denies_all() {
        assert!(!agent(&[]).may_call("B"));
    }

    #[test]
    fn star_allows_any() {
        assert!(agent(&["*"]).may_call("B"));
        assert!(agent(&["*"]).may_call("team/nested/agent"));
    }

    #[test]
    fn explicit_list_is_verbatim() {
        let a = agent(&["B", "myrepo/feature/agent"]);
        assert!(a.may_call("B"));
        assert!(a.may_call("myrepo/feature/agent"));
        assert!(!a.may_call("b"));
        assert!(!a.may_call("C"));
    }

    #[test]
    fn tool_selection_star_deserializes() {
        let sel: ToolSelection = serde_json::from_str("\"*\"").unwrap();
        assert_eq!(sel, ToolSelection::All);
        assert!(sel.allows("anything"));
    }

    #[test]
    fn tool_selection_named_deserializes() {
        let sel: ToolSelection = serde_json::from_str("[\"search\",\"fetch\"]").unwrap();
        assert!(sel.allows("search"));
        assert!(!sel.allows("delete"));
    }

    #[test]
    fn tool_selection_null_means_no_access() {
        let sel: ToolSelection = serde_json::from_str("null").unwrap();
        assert_eq!(sel, ToolSelection::None);
        assert!(!sel.allows("anything"));
    }

    #[test]
    fn tool_selection_rejects_other_shapes() {
        assert!(serde_json::from_str::<ToolSelection>("\"some-tool\"").is_err());
        assert!(serde_json::from_str::<ToolSelection>("42").is_err());
        assert!(serde_json::from_str::<ToolSelection>("[1, 2]").is_err());
    }

    #[test]
    fn server_map_preserves_declaration_order() {
        let map: McpServerMap = serde_json::from_value(json!({
            "zeta": "*",
            "alpha": ["search"],
            "mid": null
        }))
        .unwrap();
        let order: Vec<&str> = map.iter().map(|(name, _)| name).collect();
        assert_eq!(order, vec!["zeta", "alpha", "mid"]);
        assert_eq!(map.get("mid"), Some(&ToolSelection::None));
    }

    #[test]
    fn server_map_round_trips_as_a_map() {
        let mut map = McpServerMap::default();
        map.insert("search", ToolSelection::All);
        map.insert("files", ToolSelection::Named(vec!["read".into()]));
        let wire = serde_json::to_value(&map).unwrap();
        assert_eq!(wire, json!({ "search": "*", "files": ["read"] }));
        let back: McpServerMap = serde_json::from_value(wire).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn server_map_repeated_key_replaces() {
        let mut map = McpServerMap::default();
        map.insert("search", ToolSelection::All);
        map.insert("search", ToolSelection::None);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("search"), Some(&ToolSelection::None));
    }

    #[test]
    fn max_iterations_defaults_to_ten() {
        let def: AgentDefinition = serde_json::from_value(serde_json::json!({
            "system_prompt": "p",
            "model": "m"
        }))
        .unwrap();
        assert_eq!(def.max_iterations, 10);
        assert_eq!(def.context_scope, ContextScope::Full);
        assert!(def.allowed_agents.is_empty());
        assert!(def.mcp_servers.is_empty());
        assert!(!def.exposed);
    }
}
