//! Capability node tree
//!
//! A request is a tree of [`CapabilityNode`]s: leaves name one capability,
//! groups bundle children that share one rationale prompt. Clients build
//! the tree once; afterwards the engine only flips the `granted` flag on
//! leaves as results come in.

use crate::error::GrantError;
use crate::host::{GrantStatus, LabelLookup};
use serde::{Deserialize, Serialize};

const fn default_true() -> bool {
    true
}

/// Title and message shown before requesting a capability
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rationale {
    /// Dialog title
    pub title: String,
    /// Dialog body
    pub message: String,
}

impl Rationale {
    /// Create rationale text
    #[inline]
    #[must_use]
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }

    /// True when there is nothing to show
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.message.trim().is_empty()
    }
}

/// A single capability request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaf {
    /// Capability identifier
    pub name: String,
    /// Denial fails the whole session
    #[serde(default = "default_true")]
    pub critical: bool,
    /// Explicit rationale title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Explicit rationale message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Whether a rationale may be shown for this leaf at all
    #[serde(default = "default_true")]
    pub show_rationale: bool,
    #[serde(skip)]
    granted: bool,
}

impl Leaf {
    /// New leaf without explicit rationale
    #[must_use]
    pub fn new(name: impl Into<String>, critical: bool) -> Self {
        Self {
            name: name.into(),
            critical,
            title: None,
            message: None,
            show_rationale: true,
            granted: false,
        }
    }

    /// With rationale title and message
    #[inline]
    #[must_use]
    pub fn with_rationale(mut self, title: impl Into<String>, message: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self.message = Some(message.into());
        self
    }

    /// With rationale title only
    #[inline]
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// With rationale message only
    #[inline]
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Never prompt for this leaf, even if the host advises it
    #[inline]
    #[must_use]
    pub fn without_rationale(mut self) -> Self {
        self.show_rationale = false;
        self
    }

    /// Grant state recorded by the engine
    #[inline]
    #[must_use]
    pub fn is_granted(&self) -> bool {
        self.granted
    }

    #[inline]
    pub(crate) fn set_granted(&mut self, granted: bool) {
        self.granted = granted;
    }

    /// Satisfied when granted or optional
    #[inline]
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.granted || !self.critical
    }
}

/// Children sharing one rationale prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Shared rationale title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Shared rationale message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Ordered children, never empty once validated
    pub children: Vec<CapabilityNode>,
}

impl Group {
    /// Group without shared rationale
    #[must_use]
    pub fn new(children: impl IntoIterator<Item = CapabilityNode>) -> Self {
        Self {
            title: None,
            message: None,
            children: children.into_iter().collect(),
        }
    }

    /// With shared rationale
    #[inline]
    #[must_use]
    pub fn with_rationale(mut self, title: impl Into<String>, message: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self.message = Some(message.into());
        self
    }

    /// Add a child
    #[inline]
    #[must_use]
    pub fn with_child(mut self, child: impl Into<CapabilityNode>) -> Self {
        self.children.push(child.into());
        self
    }
}

/// Leaf or group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapabilityNode {
    /// One capability
    Leaf(Leaf),
    /// Several capabilities with a shared rationale
    Group(Group),
}

impl From<Leaf> for CapabilityNode {
    fn from(leaf: Leaf) -> Self {
        Self::Leaf(leaf)
    }
}

impl From<Group> for CapabilityNode {
    fn from(group: Group) -> Self {
        Self::Group(group)
    }
}

/// Leaf node without explicit rationale
#[must_use]
pub fn leaf(name: impl Into<String>, critical: bool) -> CapabilityNode {
    Leaf::new(name, critical).into()
}

/// Leaf node carrying its own rationale
#[must_use]
pub fn leaf_with_rationale(
    name: impl Into<String>,
    critical: bool,
    title: impl Into<String>,
    message: impl Into<String>,
) -> CapabilityNode {
    Leaf::new(name, critical).with_rationale(title, message).into()
}

/// Group node whose children share `title` and `message`
#[must_use]
pub fn group(
    title: impl Into<String>,
    message: impl Into<String>,
    children: impl IntoIterator<Item = CapabilityNode>,
) -> CapabilityNode {
    Group::new(children).with_rationale(title, message).into()
}

/// Group node without shared rationale
#[must_use]
pub fn untitled_group(children: impl IntoIterator<Item = CapabilityNode>) -> CapabilityNode {
    Group::new(children).into()
}

impl CapabilityNode {
    /// Check if this is a group
    #[inline]
    #[must_use]
    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }

    /// Leaf: granted or optional. Group: every child satisfied.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        match self {
            Self::Leaf(leaf) => leaf.is_satisfied(),
            Self::Group(group) => group.children.iter().all(Self::is_satisfied),
        }
    }

    /// Capability identifiers under this node, depth first
    #[must_use]
    pub fn capability_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Leaf(leaf) => out.push(&leaf.name),
            Self::Group(group) => group.children.iter().for_each(|c| c.collect_names(out)),
        }
    }

    /// Explicit rationale fields, if any were set
    #[must_use]
    pub fn explicit_rationale(&self) -> (Option<&str>, Option<&str>) {
        match self {
            Self::Leaf(leaf) => (leaf.title.as_deref(), leaf.message.as_deref()),
            Self::Group(group) => (group.title.as_deref(), group.message.as_deref()),
        }
    }

    /// Rationale to show for this node
    ///
    /// Explicit text wins. Otherwise a leaf asks the host for the capability
    /// label (title) and description (message), and a group uses its
    /// structural description. Failed lookups yield the raw identifier.
    pub fn flatten_label<L: LabelLookup + ?Sized>(&self, labels: &L) -> Rationale {
        let (title, message) = self.explicit_rationale();
        match self {
            Self::Leaf(leaf) => Rationale {
                title: title.map_or_else(|| lookup_or_raw(&leaf.name, |n| labels.lookup_label(n)), str::to_owned),
                message: message
                    .map_or_else(|| lookup_or_raw(&leaf.name, |n| labels.lookup_description(n)), str::to_owned),
            },
            Self::Group(_) => Rationale {
                title: title.map_or_else(|| self.to_string(), str::to_owned),
                message: message.map_or_else(|| self.to_string(), str::to_owned),
            },
        }
    }

    /// Reject empty groups and blank capability names
    pub fn validate(&self) -> Result<(), GrantError> {
        match self {
            Self::Leaf(leaf) if leaf.name.trim().is_empty() => {
                Err(GrantError::InvalidNode("capability name is empty".to_string()))
            }
            Self::Leaf(_) => Ok(()),
            Self::Group(group) if group.children.is_empty() => {
                Err(GrantError::InvalidNode(format!("group {self} has no children")))
            }
            Self::Group(group) => group.children.iter().try_for_each(Self::validate),
        }
    }

    /// Record host results for every leaf under this node whose name was
    /// delivered; other leaves keep their state. `record` sees each touched
    /// leaf.
    pub(crate) fn apply_grants(
        &mut self,
        names: &[String],
        statuses: &[GrantStatus],
        record: &mut impl FnMut(&str, bool),
    ) {
        match self {
            Self::Leaf(leaf) => {
                if let Some(i) = names.iter().position(|n| *n == leaf.name) {
                    let granted = statuses.get(i).is_some_and(|s| s.is_granted());
                    leaf.set_granted(granted);
                    record(&leaf.name, granted);
                }
            }
            Self::Group(group) => {
                for child in &mut group.children {
                    child.apply_grants(names, statuses, record);
                }
            }
        }
    }

    /// Node at `path` below `roots`
    pub(crate) fn at<'a>(roots: &'a [Self], path: &NodePath) -> Option<&'a Self> {
        let (first, rest) = path.0.split_first()?;
        rest.iter().try_fold(roots.get(*first)?, |node, &i| match node {
            Self::Group(group) => group.children.get(i),
            Self::Leaf(_) => None,
        })
    }

    /// Mutable node at `path` below `roots`
    pub(crate) fn at_mut<'a>(roots: &'a mut [Self], path: &NodePath) -> Option<&'a mut Self> {
        let (first, rest) = path.0.split_first()?;
        rest.iter().try_fold(roots.get_mut(*first)?, |node, &i| match node {
            Self::Group(group) => group.children.get_mut(i),
            Self::Leaf(_) => None,
        })
    }
}

fn lookup_or_raw(name: &str, lookup: impl FnOnce(&str) -> Result<String, crate::error::HostError>) -> String {
    match lookup(name) {
        Ok(text) if !text.is_empty() => text,
        Ok(_) => name.to_string(),
        Err(e) => {
            tracing::debug!(capability = %name, error = %e, "label lookup failed, using identifier");
            name.to_string()
        }
    }
}

impl std::fmt::Display for CapabilityNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leaf(leaf) => write!(f, "Capability:{}", leaf.name),
            Self::Group(group) => {
                write!(f, "Capability group:[")?;
                for (i, child) in group.children.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{child}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Index path from the root list down to a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NodePath(pub(crate) Vec<usize>);

impl NodePath {
    /// Path of a root node
    #[inline]
    #[must_use]
    pub fn root(index: usize) -> Self {
        Self(vec![index])
    }

    /// Path of this node's `index`-th child
    #[inline]
    #[must_use]
    pub fn child(&self, index: usize) -> Self {
        let mut path = self.0.clone();
        path.push(index);
        Self(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostError;
    use proptest::prelude::*;

    struct NoLabels;

    impl LabelLookup for NoLabels {
        fn lookup_label(&self, capability: &str) -> Result<String, HostError> {
            Err(HostError::LookupFailed {
                capability: capability.to_string(),
            })
        }

        fn lookup_description(&self, capability: &str) -> Result<String, HostError> {
            Err(HostError::LookupFailed {
                capability: capability.to_string(),
            })
        }
    }

    struct Labels;

    impl LabelLookup for Labels {
        fn lookup_label(&self, capability: &str) -> Result<String, HostError> {
            Ok(format!("label of {capability}"))
        }

        fn lookup_description(&self, capability: &str) -> Result<String, HostError> {
            Ok(format!("about {capability}"))
        }
    }

    fn granted_leaf(name: &str, critical: bool, granted: bool) -> CapabilityNode {
        let mut leaf = Leaf::new(name, critical);
        leaf.set_granted(granted);
        leaf.into()
    }

    #[test]
    fn leaf_satisfaction() {
        assert!(granted_leaf("a", true, true).is_satisfied());
        assert!(!granted_leaf("a", true, false).is_satisfied());
        assert!(granted_leaf("a", false, false).is_satisfied());
    }

    #[test]
    fn group_is_and_of_children() {
        let satisfied = untitled_group([granted_leaf("a", true, true), granted_leaf("b", false, false)]);
        assert!(satisfied.is_satisfied());

        let nested = untitled_group([satisfied.clone(), untitled_group([granted_leaf("c", true, false)])]);
        assert!(!nested.is_satisfied());
    }

    #[test]
    fn capability_names_are_depth_first() {
        let node = group("T", "M", [leaf("a", true), untitled_group([leaf("b", false), leaf("c", true)])]);
        assert_eq!(node.capability_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn flatten_label_prefers_explicit_text() {
        let node = leaf_with_rationale("camera", true, "Camera", "Needed for scanning");
        assert_eq!(node.flatten_label(&NoLabels), Rationale::new("Camera", "Needed for scanning"));
    }

    #[test]
    fn flatten_label_uses_host_lookup() {
        let node = leaf("camera", true);
        assert_eq!(node.flatten_label(&Labels), Rationale::new("label of camera", "about camera"));
    }

    #[test]
    fn flatten_label_falls_back_to_identifier() {
        let node: CapabilityNode = Leaf::new("camera", true).with_title("Camera").into();
        assert_eq!(node.flatten_label(&NoLabels), Rationale::new("Camera", "camera"));
    }

    #[test]
    fn flatten_label_group_uses_description() {
        let node = untitled_group([leaf("a", true), leaf("b", true)]);
        let label = node.flatten_label(&Labels);
        assert_eq!(label.title, "Capability group:[Capability:a, Capability:b]");
        assert_eq!(label.message, label.title);
    }

    #[test]
    fn validate_rejects_empty_group_and_blank_name() {
        assert!(untitled_group([]).validate().is_err());
        assert!(leaf("  ", true).validate().is_err());
        assert!(untitled_group([untitled_group([])]).validate().is_err());
        assert!(group("T", "M", [leaf("a", true)]).validate().is_ok());
    }

    #[test]
    fn apply_grants_touches_matching_leaves_only() {
        let mut node = untitled_group([granted_leaf("a", true, true), leaf("b", true), leaf("c", true)]);
        let mut touched = Vec::new();
        node.apply_grants(
            &["b".to_string(), "c".to_string()],
            &[GrantStatus::Granted],
            &mut |name: &str, granted: bool| touched.push((name.to_string(), granted)),
        );

        assert_eq!(touched, vec![("b".to_string(), true), ("c".to_string(), false)]);
        let CapabilityNode::Group(group) = &node else { unreachable!() };
        let granted: Vec<bool> = group
            .children
            .iter()
            .map(|c| matches!(c, CapabilityNode::Leaf(l) if l.is_granted()))
            .collect();
        assert_eq!(granted, vec![true, true, false]);
    }

    #[test]
    fn node_paths_resolve() {
        let roots = vec![leaf("a", true), untitled_group([leaf("b", true), untitled_group([leaf("c", true)])])];
        let path = NodePath::root(1).child(1).child(0);
        assert_eq!(CapabilityNode::at(&roots, &path).map(ToString::to_string).as_deref(), Some("Capability:c"));
        assert!(CapabilityNode::at(&roots, &NodePath::root(0).child(0)).is_none());
        assert!(CapabilityNode::at(&roots, &NodePath::root(5)).is_none());
    }

    #[test]
    fn serde_tagged_round_trip_keeps_defaults() {
        let node: CapabilityNode = toml::from_str(
            r#"
            kind = "group"
            title = "T"
            [[children]]
            kind = "leaf"
            name = "a"
            [[children]]
            kind = "leaf"
            name = "b"
            critical = false
            "#,
        )
        .unwrap();
        let expected: CapabilityNode = Group {
            title: Some("T".to_string()),
            message: None,
            children: vec![leaf("a", true), leaf("b", false)],
        }
        .into();
        assert_eq!(node, expected);
    }

    fn arb_tree() -> impl Strategy<Value = CapabilityNode> {
        let leaf = (0u8..6, any::<bool>(), any::<bool>())
            .prop_map(|(n, critical, granted)| granted_leaf(&format!("cap{n}"), critical, granted));
        leaf.prop_recursive(4, 32, 4, |inner| {
            prop::collection::vec(inner, 1..4).prop_map(untitled_group)
        })
    }

    fn critical_granted_paths(node: &CapabilityNode, path: Vec<usize>, out: &mut Vec<Vec<usize>>) {
        match node {
            CapabilityNode::Leaf(leaf) if leaf.critical && leaf.is_granted() => out.push(path),
            CapabilityNode::Leaf(_) => {}
            CapabilityNode::Group(group) => {
                for (i, child) in group.children.iter().enumerate() {
                    let mut p = path.clone();
                    p.push(i);
                    critical_granted_paths(child, p, out);
                }
            }
        }
    }

    proptest! {
        #[test]
        fn prop_revoking_critical_grant_never_satisfies(tree in arb_tree(), pick in any::<prop::sample::Index>()) {
            let mut paths = Vec::new();
            critical_granted_paths(&tree, vec![0], &mut paths);
            prop_assume!(!paths.is_empty());

            let before = tree.is_satisfied();
            let mut roots = vec![tree];
            let path = NodePath(pick.get(&paths).clone());
            if let Some(CapabilityNode::Leaf(leaf)) = CapabilityNode::at_mut(&mut roots, &path) {
                leaf.set_granted(false);
            }
            let after = roots[0].is_satisfied();

            prop_assert!(!after);
            prop_assert!(before || !after);
        }
    }
}
