//! The device's self-described configuration tree.
//!
//! Cameras report their settings as a tree of named nodes. Section nodes
//! carry children and no value; Radio/Menu nodes carry an ordered choice
//! list; Range nodes carry `(min, max, step)`; the remaining kinds hold a
//! bare scalar. Trees are read-only snapshots: a write can change which
//! nodes exist (exposure-mode changes add, remove, or relabel nodes), so
//! callers re-read instead of caching across mode changes.

use serde::{Deserialize, Serialize};

/// Node type, mirroring the widget kinds the device protocol reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Grouping node with children and no value.
    Section,
    /// Free-form text value.
    Text,
    /// Numeric value constrained to `(min, max, step)`.
    Range,
    /// Boolean value.
    Toggle,
    /// One value out of an ordered choice list.
    Radio,
    /// One value out of an ordered choice list (menu presentation).
    Menu,
    /// Action trigger, value-less from the caller's point of view.
    Button,
    /// Date/time value.
    Date,
}

impl NodeKind {
    /// True for kinds that carry a choice list.
    pub fn has_choices(self) -> bool {
        matches!(self, NodeKind::Radio | NodeKind::Menu)
    }
}

/// One entry in the device's settings tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigNode {
    /// Physical identifier known to the device.
    pub name: String,
    /// Node type.
    pub kind: NodeKind,
    /// Current scalar, present for all non-Section kinds.
    pub value: Option<String>,
    /// Ordered legal values, present only for Radio/Menu.
    pub choices: Vec<String>,
    /// `(min, max, step)`, present only for Range.
    pub range: Option<(f64, f64, f64)>,
    /// Child nodes, present only for Section.
    pub children: Vec<ConfigNode>,
}

impl ConfigNode {
    /// Create a Section node.
    pub fn section(name: impl Into<String>, children: Vec<ConfigNode>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Section,
            value: None,
            choices: Vec::new(),
            range: None,
            children,
        }
    }

    /// Create a Radio node with a choice list and current value.
    pub fn radio(
        name: impl Into<String>,
        value: impl Into<String>,
        choices: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Radio,
            value: Some(value.into()),
            choices,
            range: None,
            children: Vec::new(),
        }
    }

    /// Create a Text node holding a scalar.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Text,
            value: Some(value.into()),
            choices: Vec::new(),
            range: None,
            children: Vec::new(),
        }
    }

    /// Create a Range node with bounds and current value.
    pub fn range_node(
        name: impl Into<String>,
        value: f64,
        min: f64,
        max: f64,
        step: f64,
    ) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Range,
            value: Some(value.to_string()),
            choices: Vec::new(),
            range: Some((min, max, step)),
            children: Vec::new(),
        }
    }

    /// Depth-first search for a node by physical name.
    ///
    /// Section nodes are traversed, never matched.
    pub fn find_by_name(&self, name: &str) -> Option<&ConfigNode> {
        if self.kind != NodeKind::Section {
            if self.name == name {
                return Some(self);
            }
            return None;
        }
        for child in &self.children {
            if let Some(found) = child.find_by_name(name) {
                return Some(found);
            }
        }
        None
    }

    /// Mutable depth-first search, used to stage a value before a write.
    pub fn find_by_name_mut(&mut self, name: &str) -> Option<&mut ConfigNode> {
        if self.kind != NodeKind::Section {
            if self.name == name {
                return Some(self);
            }
            return None;
        }
        for child in &mut self.children {
            if let Some(found) = child.find_by_name_mut(name) {
                return Some(found);
            }
        }
        None
    }

    /// Leaf node names in depth-first order, for listings.
    pub fn leaf_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_leaf_names(&mut names);
        names
    }

    fn collect_leaf_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        if self.kind == NodeKind::Section {
            for child in &self.children {
                child.collect_leaf_names(out);
            }
        } else {
            out.push(&self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> ConfigNode {
        ConfigNode::section(
            "main",
            vec![
                ConfigNode::section(
                    "capturesettings",
                    vec![
                        ConfigNode::radio(
                            "iso",
                            "400",
                            vec!["100".into(), "200".into(), "400".into()],
                        ),
                        ConfigNode::radio(
                            "aperture",
                            "4.0",
                            vec!["2.8".into(), "4.0".into(), "5.6".into()],
                        ),
                    ],
                ),
                ConfigNode::text("serialnumber", "00042"),
            ],
        )
    }

    #[test]
    fn test_find_traverses_sections() {
        let tree = sample_tree();
        let node = tree.find_by_name("aperture").unwrap();
        assert_eq!(node.kind, NodeKind::Radio);
        assert_eq!(node.value.as_deref(), Some("4.0"));
    }

    #[test]
    fn test_sections_are_never_matched() {
        let tree = sample_tree();
        assert!(tree.find_by_name("capturesettings").is_none());
        assert!(tree.find_by_name("main").is_none());
    }

    #[test]
    fn test_find_missing_name() {
        let tree = sample_tree();
        assert!(tree.find_by_name("shutterspeed").is_none());
    }

    #[test]
    fn test_leaf_names_depth_first() {
        let tree = sample_tree();
        assert_eq!(tree.leaf_names(), vec!["iso", "aperture", "serialnumber"]);
    }

    #[test]
    fn test_node_kind_shapes() {
        let zoom = ConfigNode::range_node("zoom", 1.0, 1.0, 10.0, 0.5);
        assert_eq!(zoom.kind, NodeKind::Range);
        assert_eq!(zoom.range, Some((1.0, 10.0, 0.5)));
        assert!(!zoom.kind.has_choices());
        assert!(NodeKind::Radio.has_choices());
        assert!(NodeKind::Menu.has_choices());
    }
}
