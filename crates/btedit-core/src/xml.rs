#![forbid(unsafe_code)]

//! Canonical XML codec.
//!
//! [`XmlCodec::decode`] accepts the interchange format produced by behavior
//! tree editors; [`XmlCodec::encode`] writes a single canonical form so that
//! saved files diff cleanly under version control:
//!
//! ```text
//! <?xml version="1.0" encoding="UTF-8"?>
//! <root main_tree="A">
//!   <BehaviorTree ID="A">
//!     <Sequence id="1">
//!       <Action id="2" type="MoveTo" goal="home"/>
//!     </Sequence>
//!   </BehaviorTree>
//!   <TreeNodesModel>
//!     <Action ID="MoveTo">
//!       <input_port name="goal"/>
//!       <parameter name="goal" default="home"/>
//!     </Action>
//!   </TreeNodesModel>
//! </root>
//! ```
//!
//! # Canonical rules
//!
//! - Trees in name order, custom models in name order.
//! - Nodes depth-first, children in stored order.
//! - Attributes: `id`, then `type` (category form only), then declared
//!   parameters in template order, then undeclared parameters sorted.
//! - Action, Condition and SubTree nodes use category form
//!   (`<Action type="MoveTo">`); Control and Decorator nodes use their type
//!   name as the tag (`<Sequence>`).
//!
//! Encoding is a pure function of the tree set, so
//! `encode(decode(encode(t))) == encode(t)`.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::{Error, Result};
use crate::registry::{NodeKind, NodeModelRegistry, NodeTypeTemplate, ParameterSpec, PortDirection, PortSpec};
use crate::tree::AbsBehaviorTree;

/// Attribute names with structural meaning; never valid parameter names.
pub const RESERVED_ATTRIBUTES: [&str; 3] = ["id", "type", "ID"];

const TREE_TAG: &str = "BehaviorTree";
const MODELS_TAG: &str = "TreeNodesModel";
const PARAMETER_TAG: &str = "parameter";

/// Every tree declared by one XML payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BehaviorTreeSet {
    pub main_tree: String,
    pub trees: BTreeMap<String, AbsBehaviorTree>,
    /// Models declared in the `TreeNodesModel` section.
    pub models: BTreeMap<String, NodeTypeTemplate>,
}

impl BehaviorTreeSet {
    /// A set holding one tree, which is also the main tree.
    #[must_use]
    pub fn single(name: impl Into<String>, tree: AbsBehaviorTree) -> Self {
        let name = name.into();
        let mut trees = BTreeMap::new();
        trees.insert(name.clone(), tree);
        Self {
            main_tree: name,
            trees,
            models: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn main(&self) -> Option<&AbsBehaviorTree> {
        self.trees.get(&self.main_tree)
    }

    /// Take the main tree out of the set.
    pub fn into_main(mut self) -> Result<(String, AbsBehaviorTree)> {
        let tree = self
            .trees
            .remove(&self.main_tree)
            .ok_or_else(|| Error::Schema(format!("main tree `{}` is not declared", self.main_tree)))?;
        Ok((self.main_tree, tree))
    }
}

/// Bidirectional mapping between [`BehaviorTreeSet`] and XML text,
/// validated against a [`NodeModelRegistry`].
#[derive(Debug, Clone)]
pub struct XmlCodec<'r> {
    registry: &'r NodeModelRegistry,
    indent: usize,
}

impl<'r> XmlCodec<'r> {
    #[must_use]
    pub fn new(registry: &'r NodeModelRegistry) -> Self {
        Self { registry, indent: 2 }
    }

    /// Spaces per nesting level in encoded output.
    #[must_use]
    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    // ====================================================================
    // Decode
    // ====================================================================

    /// Parse a payload declaring one or more trees.
    ///
    /// Models from a `TreeNodesModel` section and SubTree templates for
    /// every declared tree are visible while validating this payload only;
    /// the codec's registry is not modified.
    pub fn decode(&self, xml: &str) -> Result<BehaviorTreeSet> {
        let document = parse_document(xml)?;
        if document.name != "root" {
            return Err(Error::Schema(format!(
                "expected <root> document element, found <{}>",
                document.name
            )));
        }

        let mut models = BTreeMap::new();
        let mut declared: Vec<(&str, &XmlElement)> = Vec::new();
        for child in &document.children {
            match child.name.as_str() {
                MODELS_TAG => {
                    for element in &child.children {
                        let model = decode_model(element)?;
                        models.insert(model.name.clone(), model);
                    }
                }
                TREE_TAG => {
                    let name = child
                        .attr("ID")
                        .ok_or_else(|| Error::Schema("<BehaviorTree> without an ID attribute".into()))?;
                    declared.push((name, child));
                }
                other => declared.push((other, child)),
            }
        }

        let mut registry = self.registry.clone();
        for model in models.values() {
            registry.register(model.clone())?;
        }
        for (name, _) in &declared {
            registry.register_subtree(name)?;
        }

        let mut trees = BTreeMap::new();
        for (name, element) in declared {
            let tree = TreeBuilder::build(&registry, name, element)?;
            if trees.insert(name.to_string(), tree).is_some() {
                return Err(Error::Schema(format!("tree `{name}` is declared twice")));
            }
        }

        let designated = document
            .attr("main_tree")
            .or_else(|| document.attr("main_tree_to_execute"));
        let main_tree = match designated {
            Some(name) if trees.contains_key(name) => name.to_string(),
            Some(name) => {
                return Err(Error::Schema(format!("main tree `{name}` is not declared")));
            }
            None => match trees.keys().next() {
                Some(only) if trees.len() == 1 => only.clone(),
                Some(_) => {
                    return Err(Error::Schema(
                        "several trees declared but no main_tree designated".into(),
                    ));
                }
                None => return Err(Error::Schema("payload declares no tree".into())),
            },
        };

        tracing::debug!(
            target: "btedit.xml",
            main_tree = %main_tree,
            trees = trees.len(),
            models = models.len(),
            "decoded tree set"
        );
        Ok(BehaviorTreeSet {
            main_tree,
            trees,
            models,
        })
    }

    /// Parse a payload and return only its main tree.
    pub fn decode_tree(&self, xml: &str) -> Result<AbsBehaviorTree> {
        self.decode(xml)?.into_main().map(|(_, tree)| tree)
    }

    // ====================================================================
    // Encode
    // ====================================================================

    /// Write the canonical form of `set`.
    ///
    /// Declared parameters missing from a node are written with their
    /// template default, matching what decoding (and
    /// [`NodeTypeTemplate::instantiate`]) fills in. Parameters stored under
    /// a [`RESERVED_ATTRIBUTES`] name are not written.
    #[must_use]
    pub fn encode(&self, set: &BehaviorTreeSet) -> String {
        let mut registry = self.registry.clone();
        let subtrees = set
            .trees
            .keys()
            .filter(|name| !self.registry.contains(name) && !set.models.contains_key(*name))
            .map(|name| NodeTypeTemplate::subtree(name.as_str()));
        for model in set.models.values().cloned().chain(subtrees) {
            let name = model.name.clone();
            if let Err(err) = registry.register(model) {
                tracing::warn!(
                    target: "btedit.xml",
                    model = %name,
                    error = %err,
                    "model ignored while encoding"
                );
            }
        }

        let mut w = XmlWriter::new(self.indent);
        w.out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        w.open("root", &[("main_tree", set.main_tree.as_str())]);
        for (name, tree) in &set.trees {
            let attrs = [("ID", name.as_str())];
            match tree.root_id() {
                None => w.empty(TREE_TAG, &attrs),
                Some(root) => {
                    w.open(TREE_TAG, &attrs);
                    write_node(&mut w, &registry, tree, root);
                    w.close(TREE_TAG);
                }
            }
        }
        if !set.models.is_empty() {
            w.open(MODELS_TAG, &[]);
            for model in set.models.values() {
                write_model(&mut w, model);
            }
            w.close(MODELS_TAG);
        }
        w.close("root");

        tracing::debug!(
            target: "btedit.xml",
            main_tree = %set.main_tree,
            trees = set.trees.len(),
            bytes = w.out.len(),
            "encoded tree set"
        );
        w.out
    }

    /// Write a payload holding only `tree`, designated as main tree.
    #[must_use]
    pub fn encode_tree(&self, name: &str, tree: &AbsBehaviorTree) -> String {
        self.encode(&BehaviorTreeSet::single(name, tree.clone()))
    }
}

// ============================================================================
// Tree construction
// ============================================================================

struct TreeBuilder<'a> {
    registry: &'a NodeModelRegistry,
    tree_name: &'a str,
    explicit_ids: BTreeSet<&'a str>,
    next_auto: usize,
    tree: AbsBehaviorTree,
}

impl<'a> TreeBuilder<'a> {
    fn build(registry: &'a NodeModelRegistry, tree_name: &'a str, element: &'a XmlElement) -> Result<AbsBehaviorTree> {
        let root = match element.children.as_slice() {
            [] => return Ok(AbsBehaviorTree::new()),
            [root] => root,
            many => {
                return Err(Error::Schema(format!(
                    "tree `{tree_name}` has {} root nodes",
                    many.len()
                )));
            }
        };
        let mut builder = Self {
            registry,
            tree_name,
            explicit_ids: BTreeSet::new(),
            next_auto: 1,
            tree: AbsBehaviorTree::new(),
        };
        builder.collect_ids(root)?;
        builder.add(root, None)?;
        Ok(builder.tree)
    }

    fn collect_ids(&mut self, element: &'a XmlElement) -> Result<()> {
        if let Some(id) = element.attr("id") {
            if id.is_empty() {
                return Err(Error::Schema(format!(
                    "empty node id in tree `{}`",
                    self.tree_name
                )));
            }
            if !self.explicit_ids.insert(id) {
                return Err(Error::Schema(format!(
                    "node id `{id}` appears twice in tree `{}`",
                    self.tree_name
                )));
            }
        }
        element
            .children
            .iter()
            .try_for_each(|child| self.collect_ids(child))
    }

    fn add(&mut self, element: &XmlElement, parent: Option<&str>) -> Result<()> {
        let (template, category) = self.resolve(element)?;
        let id = match element.attr("id") {
            Some(id) => id.to_string(),
            None => self.auto_id(),
        };
        if !category {
            if let Some((key, _)) = element
                .attributes
                .iter()
                .find(|(key, _)| key != "id" && RESERVED_ATTRIBUTES.contains(&key.as_str()))
            {
                return Err(Error::Schema(format!(
                    "<{}> node `{id}` uses reserved attribute `{key}` as a parameter",
                    element.name
                )));
            }
        }
        let parameters = element
            .attributes
            .iter()
            .filter(|(key, _)| !RESERVED_ATTRIBUTES.contains(&key.as_str()))
            .cloned();
        let node = template.instantiate(id.clone(), parameters);
        if template.kind.is_leaf() && !element.children.is_empty() {
            return Err(Error::Schema(format!(
                "{} node `{id}` cannot have children",
                template.kind
            )));
        }
        self.tree.insert(parent, usize::MAX, node)?;
        for child in &element.children {
            self.add(child, Some(&id))?;
        }
        Ok(())
    }

    /// Template for `element`, and whether it uses category form.
    fn resolve(&self, element: &XmlElement) -> Result<(&'a NodeTypeTemplate, bool)> {
        let Some(kind) = NodeKind::from_tag(&element.name) else {
            return Ok((self.registry.resolve(&element.name)?, false));
        };
        let type_name = element
            .attr("type")
            .or_else(|| element.attr("ID"))
            .ok_or_else(|| {
                Error::Schema(format!("<{}> node without a type attribute", element.name))
            })?;
        let template = self.registry.resolve(type_name)?;
        if template.kind != kind {
            return Err(Error::Schema(format!(
                "`{type_name}` is a {} model, not {kind}",
                template.kind
            )));
        }
        Ok((template, true))
    }

    fn auto_id(&mut self) -> String {
        loop {
            let candidate = self.next_auto.to_string();
            self.next_auto += 1;
            if !self.explicit_ids.contains(candidate.as_str()) && !self.tree.contains(&candidate) {
                return candidate;
            }
        }
    }
}

fn decode_model(element: &XmlElement) -> Result<NodeTypeTemplate> {
    let kind = NodeKind::from_tag(&element.name).ok_or_else(|| {
        Error::Schema(format!("unknown model category <{}>", element.name))
    })?;
    let name = element
        .attr("ID")
        .ok_or_else(|| Error::Schema(format!("<{}> model without an ID", element.name)))?;
    let mut template = NodeTypeTemplate::new(name, kind);
    for child in &element.children {
        let member = child.attr("name").ok_or_else(|| {
            Error::Schema(format!("<{}> in model `{name}` without a name", child.name))
        })?;
        if child.name == PARAMETER_TAG {
            template.parameters.push(ParameterSpec {
                name: member.to_string(),
                default: child.attr("default").unwrap_or_default().to_string(),
            });
        } else if let Some(direction) = PortDirection::from_tag(&child.name) {
            template.ports.push(PortSpec {
                name: member.to_string(),
                direction,
            });
        } else {
            return Err(Error::Schema(format!(
                "unexpected <{}> in model `{name}`",
                child.name
            )));
        }
    }
    Ok(template)
}

// ============================================================================
// Canonical writer
// ============================================================================

struct XmlWriter {
    out: String,
    indent: usize,
    depth: usize,
}

impl XmlWriter {
    fn new(indent: usize) -> Self {
        Self {
            out: String::new(),
            indent,
            depth: 0,
        }
    }

    fn start_tag(&mut self, tag: &str, attrs: &[(&str, &str)]) {
        self.out.push_str(&" ".repeat(self.indent * self.depth));
        self.out.push('<');
        self.out.push_str(tag);
        for (key, value) in attrs {
            self.out.push(' ');
            self.out.push_str(key);
            self.out.push_str("=\"");
            self.out.push_str(&quick_xml::escape::escape(*value));
            self.out.push('"');
        }
    }

    fn open(&mut self, tag: &str, attrs: &[(&str, &str)]) {
        self.start_tag(tag, attrs);
        self.out.push_str(">\n");
        self.depth += 1;
    }

    fn empty(&mut self, tag: &str, attrs: &[(&str, &str)]) {
        self.start_tag(tag, attrs);
        self.out.push_str("/>\n");
    }

    fn close(&mut self, tag: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.out.push_str(&" ".repeat(self.indent * self.depth));
        self.out.push_str("</");
        self.out.push_str(tag);
        self.out.push_str(">\n");
    }
}

fn write_node(w: &mut XmlWriter, registry: &NodeModelRegistry, tree: &AbsBehaviorTree, id: &str) {
    let Some(node) = tree.get(id) else {
        return;
    };
    let template = registry.get(&node.type_name);
    let category = template.filter(|t| !matches!(t.kind, NodeKind::Control | NodeKind::Decorator));

    let mut parameters: Cow<'_, BTreeMap<String, String>> = Cow::Borrowed(&node.parameters);
    if let Some(template) = template {
        if template.parameter_names().any(|p| !node.parameters.contains_key(p)) {
            template.fill_defaults(parameters.to_mut());
        }
    }
    if parameters.keys().any(|k| RESERVED_ATTRIBUTES.contains(&k.as_str())) {
        parameters
            .to_mut()
            .retain(|k, _| !RESERVED_ATTRIBUTES.contains(&k.as_str()));
    }

    let mut attrs: Vec<(&str, &str)> = vec![("id", node.id.as_str())];
    let tag = match category {
        Some(template) => {
            attrs.push(("type", node.type_name.as_str()));
            template.kind.tag()
        }
        None => node.type_name.as_str(),
    };
    if let Some(template) = template {
        for name in template.parameter_names() {
            if let Some(value) = parameters.get(name) {
                attrs.push((name, value.as_str()));
            }
        }
    }
    for (name, value) in parameters.iter() {
        if template.is_none_or(|t| !t.declares(name)) {
            attrs.push((name.as_str(), value.as_str()));
        }
    }

    if node.children().is_empty() {
        w.empty(tag, &attrs);
    } else {
        w.open(tag, &attrs);
        for child in node.children() {
            write_node(w, registry, tree, child);
        }
        w.close(tag);
    }
}

fn write_model(w: &mut XmlWriter, model: &NodeTypeTemplate) {
    let tag = model.kind.tag();
    let attrs = [("ID", model.name.as_str())];
    if model.ports.is_empty() && model.parameters.is_empty() {
        w.empty(tag, &attrs);
        return;
    }
    w.open(tag, &attrs);
    for port in &model.ports {
        w.empty(port.direction.tag(), &[("name", port.name.as_str())]);
    }
    for parameter in &model.parameters {
        w.empty(
            PARAMETER_TAG,
            &[
                ("name", parameter.name.as_str()),
                ("default", parameter.default.as_str()),
            ],
        );
    }
    w.close(tag);
}

// ============================================================================
// Markup parsing
// ============================================================================

#[derive(Debug)]
struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlElement>,
}

impl XmlElement {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn parse_document(xml: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut document: Option<XmlElement> = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                if document.is_some() {
                    return Err(Error::Parse("content after the document element".into()));
                }
                stack.push(element_from(&start)?);
            }
            Ok(Event::Empty(start)) => {
                let element = element_from(&start)?;
                attach(&mut stack, &mut document, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| Error::Parse("closing tag without an opening tag".into()))?;
                attach(&mut stack, &mut document, element)?;
            }
            Ok(Event::Text(text)) => {
                if !text.iter().all(u8::is_ascii_whitespace) {
                    return Err(Error::Parse(format!(
                        "unexpected text content `{}`",
                        String::from_utf8_lossy(&text).trim()
                    )));
                }
            }
            Ok(Event::CData(_)) => {
                return Err(Error::Parse("unexpected CDATA section".into()));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(Error::Parse(format!(
                    "at byte {}: {err}",
                    reader.buffer_position()
                )));
            }
        }
    }
    if let Some(open) = stack.last() {
        return Err(Error::Parse(format!("element <{}> is never closed", open.name)));
    }
    document.ok_or_else(|| Error::Parse("document has no root element".into()))
}

fn attach(stack: &mut [XmlElement], document: &mut Option<XmlElement>, element: XmlElement) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        Ok(())
    } else if document.is_some() {
        Err(Error::Parse("more than one top-level element".into()))
    } else {
        *document = Some(element);
        Ok(())
    }
}

fn element_from(start: &BytesStart<'_>) -> Result<XmlElement> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|err| Error::Parse(format!("element name is not UTF-8: {err}")))?
        .to_string();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|err| Error::Parse(format!("bad attribute on <{name}>: {err}")))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|err| Error::Parse(format!("attribute name on <{name}> is not UTF-8: {err}")))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|err| Error::Parse(format!("attribute `{key}` on <{name}>: {err}")))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(XmlElement {
        name,
        attributes,
        children: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::NodeStatus;
    use crate::tree::TreeNode;

    const EXAMPLE: &str = r#"<root main_tree="A"><A><Sequence id="1"><Action id="2" type="MoveTo"/></Sequence></A></root>"#;

    fn registry() -> NodeModelRegistry {
        let mut registry = NodeModelRegistry::with_builtins();
        registry
            .register(
                NodeTypeTemplate::new("MoveTo", NodeKind::Action)
                    .with_port("goal", PortDirection::Input)
                    .with_parameter("goal", "home"),
            )
            .unwrap();
        registry
            .register(NodeTypeTemplate::new("IsBatteryOk", NodeKind::Condition))
            .unwrap();
        registry
    }

    #[test]
    fn decodes_the_example_document() {
        let registry = registry();
        let set = XmlCodec::new(&registry).decode(EXAMPLE).unwrap();
        assert_eq!(set.main_tree, "A");
        let tree = set.main().unwrap();
        assert_eq!(tree.root_id(), Some("1"));
        assert_eq!(tree.get("1").unwrap().type_name, "Sequence");
        assert_eq!(tree.children("1"), ["2"]);
        let action = tree.get("2").unwrap();
        assert_eq!(action.type_name, "MoveTo");
        assert_eq!(action.parameters["goal"], "home");
        assert_eq!(action.status, NodeStatus::Idle);
    }

    #[test]
    fn encode_is_canonical() {
        let registry = registry();
        let codec = XmlCodec::new(&registry);
        let set = codec.decode(EXAMPLE).unwrap();
        let expected = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<root main_tree=\"A\">\n  <BehaviorTree ID=\"A\">\n    <Sequence id=\"1\">\n      \
<Action id=\"2\" type=\"MoveTo\" goal=\"home\"/>\n    </Sequence>\n  </BehaviorTree>\n</root>\n";
        assert_eq!(codec.encode(&set), expected);
    }

    #[test]
    fn round_trip_is_idempotent() {
        let registry = registry();
        let codec = XmlCodec::new(&registry);
        let xml = r#"<root main_tree_to_execute="Main">
              <BehaviorTree ID="Main">
                <Fallback id="f">
                  <Condition type="IsBatteryOk" id="c"/>
                  <Repeat num_cycles="3" id="r"><MoveTo goal="dock &amp; charge" id="m" speed="fast"/></Repeat>
                  <SubTree type="Patrol" id="s"/>
                </Fallback>
              </BehaviorTree>
              <BehaviorTree ID="Patrol"><AlwaysSuccess/></BehaviorTree>
            </root>"#;
        let first = codec.decode(xml).unwrap();
        let encoded = codec.encode(&first);
        let second = codec.decode(&encoded).unwrap();
        assert_eq!(first, second);
        assert_eq!(codec.encode(&second), encoded);
        assert!(encoded.contains(r#"<Action id="m" type="MoveTo" goal="dock &amp; charge" speed="fast"/>"#));
        assert!(encoded.contains(r#"<Repeat id="r" num_cycles="3">"#));
    }

    #[test]
    fn missing_ids_are_assigned_around_explicit_ones() {
        let registry = registry();
        let xml = r#"<root><T><Sequence><AlwaysSuccess id="1"/><AlwaysFailure/></Sequence></T></root>"#;
        let tree = XmlCodec::new(&registry).decode_tree(xml).unwrap();
        assert_eq!(tree.root_id(), Some("2"));
        assert_eq!(tree.children("2"), ["1", "3"]);
    }

    #[test]
    fn tree_nodes_model_is_read_and_written() {
        let registry = NodeModelRegistry::with_builtins();
        let codec = XmlCodec::new(&registry);
        let xml = r#"<root main_tree="A">
            <BehaviorTree ID="A"><Action id="1" type="Grip" force="5"/></BehaviorTree>
            <TreeNodesModel>
              <Action ID="Grip"><input_port name="force"/><parameter name="force" default="1"/></Action>
            </TreeNodesModel>
            </root>"#;
        let set = codec.decode(xml).unwrap();
        assert_eq!(set.models["Grip"].parameters[0].default, "1");
        assert!(!registry.contains("Grip"));
        let encoded = codec.encode(&set);
        assert!(encoded.contains("  <TreeNodesModel>\n    <Action ID=\"Grip\">\n      <input_port name=\"force\"/>\n"));
        assert_eq!(codec.decode(&encoded).unwrap(), set);
    }

    #[test]
    fn malformed_markup_is_a_parse_error() {
        let registry = registry();
        let codec = XmlCodec::new(&registry);
        for bad in [
            "<root><A><Sequence id=\"1\"></A></root>",
            "<root><A>",
            "<root><A><Sequence id=\"1\" id=\"2\"/></A></root>",
            "<root><A>hello</A></root>",
            "<root/><root/>",
            "",
        ] {
            assert!(matches!(codec.decode(bad), Err(Error::Parse(_))), "{bad:?}");
        }
    }

    #[test]
    fn invalid_trees_are_schema_errors() {
        let registry = registry();
        let codec = XmlCodec::new(&registry);
        for bad in [
            r#"<root><A><Unknown id="1"/></A></root>"#,
            r#"<root><A><Sequence id="1"><Action id="1" type="MoveTo"/></Sequence></A></root>"#,
            r#"<root><A><AlwaysSuccess id="1"/><AlwaysSuccess id="2"/></A></root>"#,
            r#"<root main_tree="B"><A><AlwaysSuccess/></A></root>"#,
            r#"<root><A><AlwaysSuccess/></A><B><AlwaysSuccess/></B></root>"#,
            r#"<root><A><Condition id="1" type="MoveTo"/></A></root>"#,
            r#"<root><A><SubTree id="1" type="A"><AlwaysSuccess/></SubTree></A></root>"#,
            r#"<root><A/><A/></root>"#,
            r#"<tree><A/></tree>"#,
            r#"<root><A><MoveTo id="1" type="fast"/></A></root>"#,
            r#"<root><A><MoveTo id="1" ID="x"/></A></root>"#,
            r#"<root><A><Action id="1" type="X"/></A><TreeNodesModel><Action ID="X"><parameter name="id" default="9"/></Action></TreeNodesModel></root>"#,
            r#"<root><A><Action id="1" type="MoveTo"><AlwaysSuccess id="2"/></Action></A></root>"#,
            r#"<root><A><Sequence id="1"><IsBatteryOk id="2"><AlwaysSuccess id="3"/></IsBatteryOk></Sequence></A></root>"#,
        ] {
            assert!(matches!(codec.decode(bad), Err(Error::Schema(_))), "{bad:?}");
        }
    }

    #[test]
    fn empty_tree_round_trips() {
        let registry = registry();
        let codec = XmlCodec::new(&registry);
        let encoded = codec.encode_tree("Blank", &AbsBehaviorTree::new());
        assert!(encoded.contains("<BehaviorTree ID=\"Blank\"/>"));
        let tree = codec.decode_tree(&encoded).unwrap();
        assert!(tree.is_empty());
    }

    #[test]
    fn indent_is_configurable() {
        let registry = registry();
        let codec = XmlCodec::new(&registry).with_indent(4);
        let set = codec.decode(EXAMPLE).unwrap();
        assert!(codec.encode(&set).contains("\n    <BehaviorTree ID=\"A\">\n        <Sequence"));
    }

    #[test]
    fn encoding_fills_declared_defaults_and_drops_reserved_keys() {
        let registry = registry();
        let codec = XmlCodec::new(&registry);
        let mut parameters = BTreeMap::new();
        parameters.insert("type".to_string(), "fast".to_string());
        let mut tree = AbsBehaviorTree::with_root(TreeNode::new("1", "Sequence", BTreeMap::new()));
        tree.insert(Some("1"), 0, TreeNode::new("2", "MoveTo", parameters)).unwrap();

        let once = codec.encode_tree("T", &tree);
        assert!(once.contains(r#"<Action id="2" type="MoveTo" goal="home"/>"#));
        let decoded = codec.decode_tree(&once).unwrap();
        assert_eq!(decoded.get("2").unwrap().parameters["goal"], "home");
        assert_eq!(codec.encode_tree("T", &decoded), once);
    }
}
