#![forbid(unsafe_code)]

//! Catalog of node-type templates.
//!
//! Every node in an [`AbsBehaviorTree`](crate::AbsBehaviorTree) names a type
//! that must resolve here. Templates carry the port schema (documentation
//! for the executor) and the parameter schema, whose declared order is the
//! canonical attribute order used by the XML encoder.
//!
//! SubTree references are ordinary templates of kind [`NodeKind::SubTree`]
//! whose name is the name of the referenced tree.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tree::TreeNode;
use crate::xml::RESERVED_ATTRIBUTES;

/// Structural role of a node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    Action,
    Condition,
    Control,
    Decorator,
    SubTree,
}

impl NodeKind {
    pub const ALL: [NodeKind; 5] = [
        Self::Action,
        Self::Condition,
        Self::Control,
        Self::Decorator,
        Self::SubTree,
    ];

    /// Tag used for this kind in XML category form and in `TreeNodesModel`.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Action => "Action",
            Self::Condition => "Condition",
            Self::Control => "Control",
            Self::Decorator => "Decorator",
            Self::SubTree => "SubTree",
        }
    }

    /// Resolve a category tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Leaves never carry children.
    #[must_use]
    pub const fn is_leaf(self) -> bool {
        matches!(self, Self::Action | Self::Condition | Self::SubTree)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
    InOut,
}

impl PortDirection {
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Input => "input_port",
            Self::Output => "output_port",
            Self::InOut => "inout_port",
        }
    }

    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        [Self::Input, Self::Output, Self::InOut]
            .into_iter()
            .find(|dir| dir.tag() == tag)
    }
}

impl FromStr for PortDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "input" | "in" => Ok(Self::Input),
            "output" | "out" => Ok(Self::Output),
            "inout" => Ok(Self::InOut),
            _ => Err(Error::Schema(format!("unknown port direction `{s}`"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    pub direction: PortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub default: String,
}

/// Template from which tree nodes of one type are instantiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTypeTemplate {
    pub name: String,
    pub kind: NodeKind,
    pub ports: Vec<PortSpec>,
    pub parameters: Vec<ParameterSpec>,
}

impl NodeTypeTemplate {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            ports: Vec::new(),
            parameters: Vec::new(),
        }
    }

    /// Template for a reference to the tree called `tree_name`.
    #[must_use]
    pub fn subtree(tree_name: impl Into<String>) -> Self {
        Self::new(tree_name, NodeKind::SubTree)
    }

    #[must_use]
    pub fn with_port(mut self, name: impl Into<String>, direction: PortDirection) -> Self {
        self.ports.push(PortSpec {
            name: name.into(),
            direction,
        });
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, default: impl Into<String>) -> Self {
        self.parameters.push(ParameterSpec {
            name: name.into(),
            default: default.into(),
        });
        self
    }

    /// Declared parameter names, in canonical order.
    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    /// Whether `name` is a declared parameter.
    #[must_use]
    pub fn declares(&self, name: &str) -> bool {
        self.parameters.iter().any(|p| p.name == name)
    }

    /// Build a node of this type. Declared parameters absent from
    /// `parameters` take their default value.
    #[must_use]
    pub fn instantiate(
        &self,
        id: impl Into<String>,
        parameters: impl IntoIterator<Item = (String, String)>,
    ) -> TreeNode {
        let mut values: BTreeMap<String, String> = self
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.default.clone()))
            .collect();
        values.extend(parameters);
        TreeNode::new(id, self.name.clone(), values)
    }

    /// Reject templates whose parameters could not survive an XML round
    /// trip: empty or reserved names, and names declared twice.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Schema(format!("{} model with an empty name", self.kind)));
        }
        for (i, spec) in self.parameters.iter().enumerate() {
            if spec.name.is_empty() || RESERVED_ATTRIBUTES.contains(&spec.name.as_str()) {
                return Err(Error::Schema(format!(
                    "model `{}` declares reserved parameter name `{}`",
                    self.name, spec.name
                )));
            }
            if self.parameters[..i].iter().any(|p| p.name == spec.name) {
                return Err(Error::Schema(format!(
                    "model `{}` declares parameter `{}` twice",
                    self.name, spec.name
                )));
            }
        }
        Ok(())
    }

    /// Fill in defaults for declared parameters missing from `parameters`.
    pub fn fill_defaults(&self, parameters: &mut BTreeMap<String, String>) {
        for spec in &self.parameters {
            parameters
                .entry(spec.name.clone())
                .or_insert_with(|| spec.default.clone());
        }
    }
}

/// Name-indexed catalog of [`NodeTypeTemplate`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeModelRegistry {
    models: BTreeMap<String, NodeTypeTemplate>,
}

impl NodeModelRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in control, decorator and
    /// leaf models.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for template in builtin_models() {
            registry.models.insert(template.name.clone(), template);
        }
        registry
    }

    /// Insert or replace a template. Returns the template it replaced.
    ///
    /// Fails with [`Error::Schema`] when [`NodeTypeTemplate::validate`]
    /// rejects the template; the registry is then unchanged.
    pub fn register(&mut self, template: NodeTypeTemplate) -> Result<Option<NodeTypeTemplate>> {
        template.validate()?;
        tracing::trace!(
            target: "btedit.registry",
            model = %template.name,
            kind = %template.kind,
            "node model registered"
        );
        Ok(self.models.insert(template.name.clone(), template))
    }

    /// Register a SubTree template for `tree_name` unless one exists.
    ///
    /// Fails with [`Error::Schema`] when the name is already taken by a
    /// model of a different kind.
    pub fn register_subtree(&mut self, tree_name: &str) -> Result<()> {
        match self.models.get(tree_name) {
            Some(existing) if existing.kind == NodeKind::SubTree => Ok(()),
            Some(existing) => Err(Error::Schema(format!(
                "tree name `{tree_name}` collides with {} model of the same name",
                existing.kind
            ))),
            None => self.register(NodeTypeTemplate::subtree(tree_name)).map(|_| ()),
        }
    }

    /// Remove a template. Usage checks belong to the caller, which knows the
    /// open documents.
    pub fn remove(&mut self, name: &str) -> Option<NodeTypeTemplate> {
        self.models.remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&NodeTypeTemplate> {
        self.models.get(name)
    }

    /// Like [`get`](Self::get), but unknown names are a schema error.
    pub fn resolve(&self, name: &str) -> Result<&NodeTypeTemplate> {
        self.get(name)
            .ok_or_else(|| Error::Schema(format!("unknown node type `{name}`")))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Whether `name` is a SubTree reference type.
    #[must_use]
    pub fn is_subtree(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|template| template.kind == NodeKind::SubTree)
    }

    /// Templates in name order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeTypeTemplate> {
        self.models.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Templates that are neither built in nor SubTree references; these
    /// are the ones written to a `TreeNodesModel` section.
    pub fn custom_models(&self) -> impl Iterator<Item = &NodeTypeTemplate> {
        self.iter()
            .filter(|t| t.kind != NodeKind::SubTree && !is_builtin(&t.name))
    }
}

/// Whether `name` is one of the models shipped by
/// [`NodeModelRegistry::with_builtins`].
#[must_use]
pub fn is_builtin(name: &str) -> bool {
    BUILTIN_NAMES.contains(&name)
}

const BUILTIN_NAMES: [&str; 14] = [
    "Sequence",
    "Fallback",
    "ReactiveSequence",
    "ReactiveFallback",
    "Parallel",
    "Inverter",
    "ForceSuccess",
    "ForceFailure",
    "Repeat",
    "RetryUntilSuccessful",
    "Timeout",
    "AlwaysSuccess",
    "AlwaysFailure",
    "SetBlackboard",
];

fn builtin_models() -> Vec<NodeTypeTemplate> {
    use NodeKind::{Action, Control, Decorator};
    use PortDirection::{Input, InOut};

    vec![
        NodeTypeTemplate::new("Sequence", Control),
        NodeTypeTemplate::new("Fallback", Control),
        NodeTypeTemplate::new("ReactiveSequence", Control),
        NodeTypeTemplate::new("ReactiveFallback", Control),
        NodeTypeTemplate::new("Parallel", Control)
            .with_port("success_threshold", Input)
            .with_port("failure_threshold", Input)
            .with_parameter("success_threshold", "-1")
            .with_parameter("failure_threshold", "1"),
        NodeTypeTemplate::new("Inverter", Decorator),
        NodeTypeTemplate::new("ForceSuccess", Decorator),
        NodeTypeTemplate::new("ForceFailure", Decorator),
        NodeTypeTemplate::new("Repeat", Decorator)
            .with_port("num_cycles", Input)
            .with_parameter("num_cycles", "1"),
        NodeTypeTemplate::new("RetryUntilSuccessful", Decorator)
            .with_port("num_attempts", Input)
            .with_parameter("num_attempts", "1"),
        NodeTypeTemplate::new("Timeout", Decorator)
            .with_port("msec", Input)
            .with_parameter("msec", "1000"),
        NodeTypeTemplate::new("AlwaysSuccess", Action),
        NodeTypeTemplate::new("AlwaysFailure", Action),
        NodeTypeTemplate::new("SetBlackboard", Action)
            .with_port("output_key", InOut)
            .with_port("value", Input)
            .with_parameter("output_key", "")
            .with_parameter("value", ""),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered_and_named_consistently() {
        let registry = NodeModelRegistry::with_builtins();
        assert_eq!(registry.len(), BUILTIN_NAMES.len());
        for name in BUILTIN_NAMES {
            assert!(registry.contains(name), "missing builtin {name}");
        }
        assert_eq!(registry.custom_models().count(), 0);
    }

    #[test]
    fn instantiate_fills_defaults_and_keeps_overrides() {
        let template = NodeTypeTemplate::new("MoveTo", NodeKind::Action)
            .with_parameter("goal", "home")
            .with_parameter("speed", "1.0");
        let node = template.instantiate("7", [("speed".to_string(), "2.5".to_string())]);
        assert_eq!(node.id, "7");
        assert_eq!(node.type_name, "MoveTo");
        assert_eq!(node.parameters["goal"], "home");
        assert_eq!(node.parameters["speed"], "2.5");
    }

    #[test]
    fn register_replaces_and_returns_previous() {
        let mut registry = NodeModelRegistry::new();
        assert!(registry.register(NodeTypeTemplate::new("A", NodeKind::Action)).unwrap().is_none());
        let old = registry.register(NodeTypeTemplate::new("A", NodeKind::Condition)).unwrap();
        assert_eq!(old.map(|t| t.kind), Some(NodeKind::Action));
        assert_eq!(registry.get("A").map(|t| t.kind), Some(NodeKind::Condition));
    }

    #[test]
    fn register_rejects_reserved_and_repeated_parameters() {
        let mut registry = NodeModelRegistry::new();
        for name in RESERVED_ATTRIBUTES.into_iter().chain([""]) {
            let template = NodeTypeTemplate::new("Grip", NodeKind::Action).with_parameter(name, "1");
            assert!(matches!(registry.register(template), Err(Error::Schema(_))), "{name:?}");
        }
        let twice = NodeTypeTemplate::new("Grip", NodeKind::Action)
            .with_parameter("force", "1")
            .with_parameter("force", "2");
        assert!(matches!(registry.register(twice), Err(Error::Schema(_))));
        assert!(matches!(
            registry.register(NodeTypeTemplate::new("", NodeKind::Action)),
            Err(Error::Schema(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn register_subtree_rejects_kind_collision() {
        let mut registry = NodeModelRegistry::with_builtins();
        assert!(registry.register_subtree("Patrol").is_ok());
        assert!(registry.register_subtree("Patrol").is_ok());
        assert!(registry.is_subtree("Patrol"));
        assert!(matches!(
            registry.register_subtree("Sequence"),
            Err(Error::Schema(_))
        ));
    }

    #[test]
    fn resolve_unknown_is_schema_error() {
        let registry = NodeModelRegistry::new();
        assert!(matches!(registry.resolve("Nope"), Err(Error::Schema(_))));
    }

    #[test]
    fn kind_tags_round_trip() {
        for kind in NodeKind::ALL {
            assert_eq!(NodeKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(NodeKind::from_tag("Sequence"), None);
    }

    #[test]
    fn port_direction_parsing() {
        assert_eq!("in".parse::<PortDirection>().unwrap(), PortDirection::Input);
        assert_eq!(
            PortDirection::from_tag("inout_port"),
            Some(PortDirection::InOut)
        );
        assert!("sideways".parse::<PortDirection>().is_err());
    }
}
