//! Node registry and tree construction
//!
//! The registry maps type names to factories and tree IDs to parsed
//! blueprints. [`NodeRegistry::create_tree`] resolves a blueprint into a live
//! [`Tree`]; every failure is a [`ConfigurationError`] raised before any node
//! is ticked, and no remote call is made while building.

use crate::blackboard::{Blackboard, SharedBlackboard, ValueKind, ERROR_MESSAGE_KEY};
use crate::config::WorkflowConfig;
use crate::controls::{require_control, validate_controls};
use crate::definition::{self, DefinitionDocument, NodeDefinition, TreeDefinition};
use crate::error::ConfigurationError;
use crate::node::{Behavior, NodeKind, TreeNode};
use crate::nodes::{self, remote::reference_key};
use crate::transport::{RemoteTimeouts, SharedTransport};
use crate::tree::Tree;
use crate::NodeId;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Element name that splices another registered tree
pub const SUBTREE_TYPE: &str = "SubTree";

/// Everything a factory sees about the node it builds
pub struct NodeConfig<'a> {
    pub name: &'a str,
    pub type_name: &'a str,
    pub attributes: &'a BTreeMap<String, String>,
    pub child_count: usize,
    pub blackboard: &'a Blackboard,
}

impl<'a> NodeConfig<'a> {
    pub fn attribute(&self, key: &str) -> Option<&'a str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn required(&self, key: &str) -> Result<&'a str, ConfigurationError> {
        self.attribute(key).ok_or_else(|| ConfigurationError::MissingAttribute {
            node: self.name.to_string(),
            attribute: key.to_string(),
        })
    }

    /// Parse an optional attribute
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigurationError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.attribute(key)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|e| ConfigurationError::InvalidAttribute {
                    node: self.name.to_string(),
                    attribute: key.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Resolve the blackboard key of a control attribute and check that the
    /// control is registered with the right kind.
    ///
    /// The attribute may name the key directly (`scan`) or as a reference
    /// (`{scan}`); `default` applies when the attribute is absent.
    pub fn require_control(
        &self,
        attribute: &str,
        kind: ValueKind,
        default: Option<&str>,
    ) -> Result<String, ConfigurationError> {
        let raw = match (self.attribute(attribute), default) {
            (Some(raw), _) => raw,
            (None, Some(default)) => default,
            (None, None) => return self.required(attribute).map(str::to_string),
        };
        let key = reference_key(raw).unwrap_or(raw);
        require_control(self.blackboard, key, kind)?;
        Ok(key.to_string())
    }
}

/// Builds the behavior of one node
pub type NodeFactory =
    Arc<dyn Fn(&NodeConfig<'_>) -> Result<Box<dyn Behavior>, ConfigurationError> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    kind: NodeKind,
    factory: NodeFactory,
}

/// Factory table plus registered tree blueprints
#[derive(Default)]
pub struct NodeRegistry {
    factories: HashMap<String, Registration>,
    trees: HashMap<String, TreeDefinition>,
    origins: HashMap<String, String>,
    main_tree: Option<String>,
}

impl NodeRegistry {
    /// Empty registry without any node type
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in catalog, with the remote adapters bound
    /// to `transport` and `timeouts`
    pub fn with_catalog(transport: SharedTransport, timeouts: RemoteTimeouts) -> Self {
        let mut registry = Self::new();
        nodes::register_catalog(&mut registry, transport, timeouts);
        registry
    }

    pub(crate) fn insert<F>(&mut self, type_name: &str, kind: NodeKind, factory: F)
    where
        F: Fn(&NodeConfig<'_>) -> Result<Box<dyn Behavior>, ConfigurationError> + Send + Sync + 'static,
    {
        self.factories.insert(
            type_name.to_string(),
            Registration {
                kind,
                factory: Arc::new(factory),
            },
        );
    }

    /// Register a node type. Names are unique.
    pub fn register_node_type<F>(&mut self, type_name: &str, kind: NodeKind, factory: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&NodeConfig<'_>) -> Result<Box<dyn Behavior>, ConfigurationError> + Send + Sync + 'static,
    {
        if type_name == SUBTREE_TYPE || self.factories.contains_key(type_name) {
            return Err(ConfigurationError::DuplicateNodeType(type_name.to_string()));
        }
        self.insert(type_name, kind, factory);
        Ok(())
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    pub fn registered_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Parse and store every tree of a definition source.
    ///
    /// Returns the IDs of the trees it registered.
    pub fn register_tree_definition(&mut self, origin: &str, xml: &str) -> Result<Vec<String>, ConfigurationError> {
        let document = definition::parse_definitions(origin, xml)?;
        self.store(document)
    }

    pub fn register_tree_from_file(&mut self, path: impl AsRef<Path>) -> Result<Vec<String>, ConfigurationError> {
        let document = definition::parse_file(path)?;
        self.store(document)
    }

    fn store(&mut self, document: DefinitionDocument) -> Result<Vec<String>, ConfigurationError> {
        for tree in &document.trees {
            if let Some(previous) = self.origins.get(&tree.id) {
                return Err(ConfigurationError::InvalidDefinition {
                    origin: document.origin.clone(),
                    reason: format!("tree '{}' is already registered from '{}'", tree.id, previous),
                });
            }
        }

        let mut ids = Vec::with_capacity(document.trees.len());
        for tree in document.trees {
            tracing::debug!("Registered tree '{}' from '{}'", tree.id, document.origin);
            self.origins.insert(tree.id.clone(), document.origin.clone());
            ids.push(tree.id.clone());
            self.trees.insert(tree.id.clone(), tree);
        }
        if document.main_tree.is_some() {
            self.main_tree = document.main_tree;
        }
        Ok(ids)
    }

    pub fn tree_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.trees.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Tree named by the last `main_tree_to_execute` seen
    pub fn main_tree(&self) -> Option<&str> {
        self.main_tree.as_deref()
    }

    /// Instantiate the named tree against a blackboard
    pub fn create_tree(&self, name: &str, blackboard: SharedBlackboard) -> Result<Tree, ConfigurationError> {
        let definition = self
            .trees
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownTreeName(name.to_string()))?;

        let mut builder = Builder {
            registry: self,
            blackboard: &blackboard,
            next_uid: 0,
            path: vec![name.to_string()],
        };
        let root = builder.build(&definition.root, name)?;
        tracing::info!("Created tree '{}' with {} nodes", name, builder.next_uid);
        Ok(Tree::new(root, blackboard))
    }
}

struct Builder<'r> {
    registry: &'r NodeRegistry,
    blackboard: &'r Blackboard,
    next_uid: NodeId,
    /// Trees currently being expanded, outermost first
    path: Vec<String>,
}

impl Builder<'_> {
    fn build(&mut self, def: &NodeDefinition, tree: &str) -> Result<TreeNode, ConfigurationError> {
        if def.type_name == SUBTREE_TYPE {
            return self.build_subtree(def);
        }

        let registry = self.registry;
        let registration = registry
            .factories
            .get(&def.type_name)
            .ok_or_else(|| ConfigurationError::UnknownNodeType {
                type_name: def.type_name.clone(),
                tree: tree.to_string(),
            })?;

        if !registration.kind.accepts_children(def.children.len()) {
            return Err(ConfigurationError::InvalidChildren {
                node: def.display_name().to_string(),
                type_name: def.type_name.clone(),
                expected: registration.kind.expected_children().to_string(),
                found: def.children.len(),
            });
        }

        let uid = self.next_uid;
        self.next_uid += 1;

        let config = NodeConfig {
            name: def.display_name(),
            type_name: &def.type_name,
            attributes: &def.attributes,
            child_count: def.children.len(),
            blackboard: self.blackboard,
        };
        let behavior = (registration.factory)(&config)?;

        let children = def
            .children
            .iter()
            .map(|child| self.build(child, tree))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TreeNode::new(
            uid,
            def.display_name(),
            def.type_name.as_str(),
            registration.kind,
            behavior,
            children,
        ))
    }

    fn build_subtree(&mut self, def: &NodeDefinition) -> Result<TreeNode, ConfigurationError> {
        let id = def
            .attributes
            .get("ID")
            .ok_or_else(|| ConfigurationError::MissingAttribute {
                node: def.display_name().to_string(),
                attribute: "ID".to_string(),
            })?;
        if self.path.iter().any(|open| open == id) {
            return Err(ConfigurationError::RecursiveSubTree(id.clone()));
        }
        let registry = self.registry;
        let subtree = registry
            .trees
            .get(id)
            .ok_or_else(|| ConfigurationError::UnknownTreeName(id.clone()))?;

        self.path.push(id.clone());
        let node = self.build(&subtree.root, id);
        self.path.pop();
        node
    }
}

/// Build the configured workflow tree.
///
/// Checks the tree sources and name, verifies the control set on the
/// blackboard, loads every definition file and instantiates the tree. The
/// parameters are published and the error message cleared only once the
/// tree exists, so a failed build leaves the blackboard untouched.
pub fn build_workflow_tree(
    config: &WorkflowConfig,
    transport: SharedTransport,
    blackboard: SharedBlackboard,
) -> Result<Tree, ConfigurationError> {
    if config.bt_files.is_empty() {
        return Err(ConfigurationError::EmptyTreeSources);
    }
    if config.tree.is_empty() {
        return Err(ConfigurationError::MissingParameter("tree".to_string()));
    }
    validate_controls(&blackboard)?;

    let mut registry = NodeRegistry::with_catalog(transport, config.timeouts());
    for file in &config.bt_files {
        registry.register_tree_from_file(file)?;
    }

    let tree = registry.create_tree(&config.tree, blackboard.clone())?;
    config.publish(&blackboard);
    blackboard.set_text(ERROR_MESSAGE_KEY, "");
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::Blackboard;
    use crate::controls::ControlPanel;
    use crate::testing::{ScriptedTransport, StubBehavior};
    use crate::NodeStatus;

    fn stub_registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry
            .register_node_type("Ok", NodeKind::Leaf, |_| Ok(Box::new(StubBehavior::new(&[NodeStatus::Success]))))
            .unwrap();
        registry
            .register_node_type("Seq", NodeKind::Composite, |_| {
                Ok(Box::new(crate::nodes::control::SequenceWithMemory::new()))
            })
            .unwrap();
        registry
    }

    #[test]
    fn test_duplicate_node_type() {
        let mut registry = stub_registry();
        let err = registry
            .register_node_type("Ok", NodeKind::Leaf, |_| Ok(Box::new(StubBehavior::new(&[]))))
            .unwrap_err();
        assert_eq!(err, ConfigurationError::DuplicateNodeType("Ok".to_string()));
    }

    #[test]
    fn test_create_tree_assigns_preorder_uids() {
        let mut registry = stub_registry();
        registry
            .register_tree_definition(
                "t.xml",
                r#"<root><BehaviorTree ID="main">
                    <Seq name="outer"><Ok name="a"/><Seq name="inner"><Ok name="b"/></Seq></Seq>
                </BehaviorTree></root>"#,
            )
            .unwrap();

        let tree = registry.create_tree("main", Blackboard::shared()).unwrap();
        let mut uids = Vec::new();
        tree.root().visit(&mut |node| uids.push((node.uid(), node.name().to_string())));
        assert_eq!(
            uids,
            vec![(0, "outer".into()), (1, "a".into()), (2, "inner".into()), (3, "b".into())]
        );
    }

    #[test]
    fn test_unknown_tree_name() {
        let registry = stub_registry();
        let err = registry.create_tree("snp", Blackboard::shared()).unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownTreeName("snp".to_string()));
        assert!(err.to_string().contains("snp"));
    }

    #[test]
    fn test_unknown_node_type() {
        let mut registry = stub_registry();
        registry
            .register_tree_definition("t.xml", r#"<root><BehaviorTree ID="main"><Teleport/></BehaviorTree></root>"#)
            .unwrap();
        assert_eq!(
            registry.create_tree("main", Blackboard::shared()).unwrap_err(),
            ConfigurationError::UnknownNodeType {
                type_name: "Teleport".to_string(),
                tree: "main".to_string(),
            }
        );
    }

    #[test]
    fn test_child_count_checked() {
        let mut registry = stub_registry();
        registry
            .register_tree_definition("t.xml", r#"<root><BehaviorTree ID="main"><Ok><Ok/></Ok></BehaviorTree></root>"#)
            .unwrap();
        assert!(matches!(
            registry.create_tree("main", Blackboard::shared()),
            Err(ConfigurationError::InvalidChildren { found: 1, .. })
        ));
    }

    #[test]
    fn test_subtree_expansion_and_recursion() {
        let mut registry = stub_registry();
        registry
            .register_tree_definition(
                "t.xml",
                r#"<root>
                    <BehaviorTree ID="main"><Seq><SubTree ID="leafy"/><Ok/></Seq></BehaviorTree>
                    <BehaviorTree ID="leafy"><Ok name="spliced"/></BehaviorTree>
                    <BehaviorTree ID="loop"><Seq><SubTree ID="loop"/></Seq></BehaviorTree>
                </root>"#,
            )
            .unwrap();

        let tree = registry.create_tree("main", Blackboard::shared()).unwrap();
        assert!(tree.root().find("spliced").is_some());
        assert_eq!(
            registry.create_tree("loop", Blackboard::shared()).unwrap_err(),
            ConfigurationError::RecursiveSubTree("loop".to_string())
        );
    }

    #[test]
    fn test_tree_defined_twice_across_sources() {
        let mut registry = stub_registry();
        let xml = r#"<root><BehaviorTree ID="main"><Ok/></BehaviorTree></root>"#;
        registry.register_tree_definition("a.xml", xml).unwrap();
        assert!(matches!(
            registry.register_tree_definition("b.xml", xml),
            Err(ConfigurationError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn test_control_attribute_checked_at_build() {
        let registry = {
            let mut r = NodeRegistry::with_catalog(Arc::new(ScriptedTransport::new()), RemoteTimeouts::default());
            r.register_tree_definition(
                "t.xml",
                r#"<root><BehaviorTree ID="main"><ButtonMonitor button="{scan}"/></BehaviorTree></root>"#,
            )
            .unwrap();
            r
        };
        assert_eq!(
            registry.create_tree("main", Blackboard::shared()).unwrap_err(),
            ConfigurationError::MissingControl("scan".to_string())
        );

        let bb = Blackboard::shared();
        ControlPanel::new().install(&bb);
        assert!(registry.create_tree("main", bb).is_ok());
    }

    #[test]
    fn test_build_workflow_tree_requires_sources() {
        let config = WorkflowConfig {
            motion_group: String::new(),
            reference_frame: String::new(),
            tcp_frame: String::new(),
            camera_frame: String::new(),
            mesh_file: String::new(),
            start_state_replacement_tolerance: 0.0,
            bt_files: vec![],
            tree: "snp".to_string(),
            bt_short_timeout: 5.0,
            bt_long_timeout: 6000.0,
        };
        let transport = Arc::new(ScriptedTransport::new());
        assert_eq!(
            build_workflow_tree(&config, transport, Blackboard::shared()).unwrap_err(),
            ConfigurationError::EmptyTreeSources
        );
    }

    #[test]
    fn test_build_workflow_tree_from_file() {
        let path = std::env::temp_dir().join(format!("snp_registry_{}.xml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"<root main_tree_to_execute="snp"><BehaviorTree ID="snp">
                <RemoteRequest service="plan" group="{motion_group}"/>
            </BehaviorTree></root>"#,
        )
        .unwrap();

        let mut config = WorkflowConfig {
            motion_group: "manipulator".to_string(),
            reference_frame: String::new(),
            tcp_frame: String::new(),
            camera_frame: String::new(),
            mesh_file: String::new(),
            start_state_replacement_tolerance: 0.0,
            bt_files: vec![path.display().to_string()],
            tree: "snp".to_string(),
            bt_short_timeout: 5.0,
            bt_long_timeout: 6000.0,
        };
        let bb = Blackboard::shared();
        ControlPanel::new().install(&bb);
        bb.set_error_message("stale");
        let transport = Arc::new(ScriptedTransport::new());

        let tree = build_workflow_tree(&config, transport.clone(), bb.clone()).unwrap();
        assert_eq!(bb.error_message(), "");
        assert_eq!(bb.text("motion_group").unwrap(), "manipulator");
        assert_eq!(tree.root().type_name(), "RemoteRequest");
        assert!(transport.calls().is_empty());

        config.tree = "missing".to_string();
        config.motion_group = "gantry".to_string();
        bb.set_error_message("previous run failed");
        assert_eq!(
            build_workflow_tree(&config, transport, bb.clone()).unwrap_err(),
            ConfigurationError::UnknownTreeName("missing".to_string())
        );
        assert_eq!(bb.error_message(), "previous run failed");
        assert_eq!(bb.text("motion_group").unwrap(), "manipulator");
        let _ = std::fs::remove_file(path);
    }
}
