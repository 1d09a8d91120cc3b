//! Suite tree registry.
//!
//! Suites and tests are declared against the name of their parent suite and
//! assembled into an arena by [`Registry::build`]. Structural errors (cycles,
//! missing or multiple roots, a root inheriting a fixture) are rejected at
//! build time, never at run time. The built [`SuiteTree`] is read-only.
//!
//! Node ids are assigned in pre-order, so iterating ids in ascending order
//! visits suites before their children and children in registration order.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use thiserror::Error;

/// Test bodies and fixtures are plain functions run inside an isolated unit.
pub type TestFn = fn();

/// Path separator between a node and its ancestors.
pub const PATH_SEPARATOR: &str = "::";

/// Setup or teardown slot of a node.
///
/// Slots default to `None`: a suite's own fixtures run once around its
/// children, and a node repeats an ancestor's fixture only when it opts in
/// with `Inherited`.
#[derive(Debug, Clone, Copy, Default)]
pub enum Fixture {
    /// No fixture; stops inheritance.
    #[default]
    None,
    /// Use the nearest ancestor's fixture.
    Inherited,
    Explicit(TestFn),
}

impl Fixture {
    #[must_use]
    pub const fn explicit(&self) -> Option<TestFn> {
        match self {
            Self::Explicit(f) => Some(*f),
            _ => None,
        }
    }
}

/// Watchdog policy of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Zero-duration limit: the watchdog is disabled and the test bounds itself.
    None,
    /// Watchdog disabled.
    Forever,
    After(Duration),
    /// Use the nearest ancestor's policy, or the configured default at the root.
    #[default]
    Inherited,
}

impl Timeout {
    /// Watchdog duration, if this policy arms one.
    #[must_use]
    pub const fn limit(self) -> Option<Duration> {
        match self {
            Self::After(d) => Some(d),
            _ => None,
        }
    }

    fn normalized(self) -> Self {
        match self {
            Self::After(d) if d.is_zero() => Self::None,
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// Suite declaration.
#[derive(Debug, Clone)]
pub struct Suite {
    name: String,
    parent: Option<String>,
    setup: Fixture,
    teardown: Fixture,
    timeout: Timeout,
}

impl Suite {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            setup: Fixture::None,
            teardown: Fixture::None,
            timeout: Timeout::Inherited,
        }
    }

    /// Attach this suite to the suite named `parent`.
    #[must_use]
    pub fn within(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    #[must_use]
    pub fn setup(self, f: TestFn) -> Self {
        self.setup_fixture(Fixture::Explicit(f))
    }

    #[must_use]
    pub fn setup_fixture(mut self, fixture: Fixture) -> Self {
        self.setup = fixture;
        self
    }

    #[must_use]
    pub fn teardown(self, f: TestFn) -> Self {
        self.teardown_fixture(Fixture::Explicit(f))
    }

    #[must_use]
    pub fn teardown_fixture(mut self, fixture: Fixture) -> Self {
        self.teardown = fixture;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Test declaration.
#[derive(Debug, Clone)]
pub struct Test {
    name: String,
    parent: Option<String>,
    body: TestFn,
    setup: Fixture,
    teardown: Fixture,
    timeout: Timeout,
}

impl Test {
    #[must_use]
    pub fn new(name: impl Into<String>, body: TestFn) -> Self {
        Self {
            name: name.into(),
            parent: None,
            body,
            setup: Fixture::None,
            teardown: Fixture::None,
            timeout: Timeout::Inherited,
        }
    }

    #[must_use]
    pub fn within(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    #[must_use]
    pub fn setup(self, f: TestFn) -> Self {
        self.setup_fixture(Fixture::Explicit(f))
    }

    #[must_use]
    pub fn setup_fixture(mut self, fixture: Fixture) -> Self {
        self.setup = fixture;
        self
    }

    #[must_use]
    pub fn teardown(self, f: TestFn) -> Self {
        self.teardown_fixture(Fixture::Explicit(f))
    }

    #[must_use]
    pub fn teardown_fixture(mut self, fixture: Fixture) -> Self {
        self.teardown = fixture;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
enum Decl {
    Suite(Suite),
    Test(Test),
}

impl Decl {
    fn name(&self) -> &str {
        match self {
            Self::Suite(s) => &s.name,
            Self::Test(t) => &t.name,
        }
    }

    fn parent(&self) -> Option<&str> {
        match self {
            Self::Suite(s) => s.parent.as_deref(),
            Self::Test(t) => t.parent.as_deref(),
        }
    }

    fn fixtures(&self) -> (Fixture, Fixture) {
        match self {
            Self::Suite(s) => (s.setup, s.teardown),
            Self::Test(t) => (t.setup, t.teardown),
        }
    }

    fn timeout(&self) -> Timeout {
        match self {
            Self::Suite(s) => s.timeout,
            Self::Test(t) => t.timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Errors detected while building the tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no root node declared")]
    NoRoot,
    #[error("several root nodes declared: {}", .0.join(", "))]
    MultipleRoots(Vec<String>),
    #[error("node names must not be empty")]
    EmptyName,
    #[error("node name `{0}` contains the path separator `::`")]
    InvalidName(String),
    #[error("suite `{0}` declared more than once")]
    DuplicateSuite(String),
    #[error("suite `{parent}` already has a child named `{name}`")]
    DuplicateChild { parent: String, name: String },
    #[error("`{node}` names unknown parent suite `{parent}`")]
    UnknownParent { node: String, parent: String },
    #[error("`{node}` names test `{parent}` as its parent")]
    ParentIsTest { node: String, parent: String },
    #[error("suite parent chain forms a cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
    #[error("root `{node}` cannot inherit its {fixture} fixture")]
    InheritedRoot { node: String, fixture: &'static str },
}

/// Collects declarations and builds a validated [`SuiteTree`].
#[derive(Debug, Clone, Default)]
pub struct Registry {
    decls: Vec<Decl>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn suite(mut self, suite: Suite) -> Self {
        self.add_suite(suite);
        self
    }

    #[must_use]
    pub fn test(mut self, test: Test) -> Self {
        self.add_test(test);
        self
    }

    pub fn add_suite(&mut self, suite: Suite) -> &mut Self {
        self.decls.push(Decl::Suite(suite));
        self
    }

    pub fn add_test(&mut self, test: Test) -> &mut Self {
        self.decls.push(Decl::Test(test));
        self
    }

    /// Validate the declarations and assemble the tree.
    pub fn build(self) -> Result<SuiteTree, RegistryError> {
        let mut suites: HashMap<&str, usize> = HashMap::new();
        let mut roots = Vec::new();

        for (idx, decl) in self.decls.iter().enumerate() {
            let name = decl.name();
            if name.is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if name.contains(PATH_SEPARATOR) {
                return Err(RegistryError::InvalidName(name.to_string()));
            }
            if let Decl::Suite(_) = decl
                && suites.insert(name, idx).is_some()
            {
                return Err(RegistryError::DuplicateSuite(name.to_string()));
            }
            if decl.parent().is_none() {
                roots.push(idx);
            }
        }

        let root = match roots.as_slice() {
            [] => return Err(RegistryError::NoRoot),
            [one] => *one,
            many => {
                return Err(RegistryError::MultipleRoots(
                    many.iter()
                        .map(|&i| self.decls[i].name().to_string())
                        .collect(),
                ));
            }
        };

        // Every parent reference must name a declared suite.
        for decl in &self.decls {
            let Some(parent) = decl.parent() else {
                continue;
            };
            if !suites.contains_key(parent) {
                let is_test = self
                    .decls
                    .iter()
                    .any(|d| matches!(d, Decl::Test(t) if t.name == parent));
                let node = decl.name().to_string();
                let parent = parent.to_string();
                return Err(if is_test {
                    RegistryError::ParentIsTest { node, parent }
                } else {
                    RegistryError::UnknownParent { node, parent }
                });
            }
        }

        // A non-root suite either reaches the root or loops.
        for decl in &self.decls {
            let Decl::Suite(suite) = decl else {
                continue;
            };
            let mut chain = vec![suite.name.as_str()];
            let mut cursor = suite.parent.as_deref();
            while let Some(parent) = cursor {
                if chain.contains(&parent) {
                    chain.push(parent);
                    return Err(RegistryError::Cycle(
                        chain.into_iter().map(str::to_string).collect(),
                    ));
                }
                chain.push(parent);
                cursor = self.decls[suites[parent]].parent();
            }
        }

        let root_decl = &self.decls[root];
        let (setup, teardown) = root_decl.fixtures();
        for (slot, fixture) in [("setup", setup), ("teardown", teardown)] {
            if let Fixture::Inherited = fixture {
                return Err(RegistryError::InheritedRoot {
                    node: root_decl.name().to_string(),
                    fixture: slot,
                });
            }
        }

        let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, decl) in self.decls.iter().enumerate() {
            if let Some(parent) = decl.parent() {
                children.entry(parent).or_default().push(idx);
            }
        }

        let mut tree = SuiteTree { nodes: Vec::new() };
        tree.insert(&self.decls, &children, root, None)?;
        Ok(tree)
    }
}

// ---------------------------------------------------------------------------
// Built tree
// ---------------------------------------------------------------------------

/// Index of a node in a [`SuiteTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Test(TestFn),
    Suite(Vec<NodeId>),
}

/// A node of the built tree.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    path: String,
    kind: NodeKind,
    setup: Fixture,
    teardown: Fixture,
    timeout: Timeout,
    parent: Option<NodeId>,
    depth: usize,
}

impl Node {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full path from the root, e.g. `all::math::add`.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub const fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[must_use]
    pub const fn is_test(&self) -> bool {
        matches!(self.kind, NodeKind::Test(_))
    }

    #[must_use]
    pub const fn setup(&self) -> Fixture {
        self.setup
    }

    #[must_use]
    pub const fn teardown(&self) -> Fixture {
        self.teardown
    }

    #[must_use]
    pub const fn timeout(&self) -> Timeout {
        self.timeout
    }

    #[must_use]
    pub const fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }
}

/// Validated, read-only suite tree. The root is always [`SuiteTree::root`].
#[derive(Debug, Clone)]
pub struct SuiteTree {
    nodes: Vec<Node>,
}

impl SuiteTree {
    fn insert(
        &mut self,
        decls: &[Decl],
        children: &HashMap<&str, Vec<usize>>,
        idx: usize,
        parent: Option<NodeId>,
    ) -> Result<NodeId, RegistryError> {
        let decl = &decls[idx];
        let id = NodeId(self.nodes.len());
        let (path, depth) = match parent {
            Some(p) => {
                let parent_node = &self.nodes[p.0];
                (
                    format!("{}{PATH_SEPARATOR}{}", parent_node.path, decl.name()),
                    parent_node.depth + 1,
                )
            }
            None => (decl.name().to_string(), 0),
        };
        let (setup, teardown) = decl.fixtures();
        let kind = match decl {
            Decl::Test(t) => NodeKind::Test(t.body),
            Decl::Suite(_) => NodeKind::Suite(Vec::new()),
        };
        self.nodes.push(Node {
            name: decl.name().to_string(),
            path,
            kind,
            setup,
            teardown,
            timeout: decl.timeout().normalized(),
            parent,
            depth,
        });

        if let Decl::Suite(suite) = decl {
            let mut seen = HashSet::new();
            let mut ids = Vec::new();
            for &child in children.get(suite.name.as_str()).into_iter().flatten() {
                let name = decls[child].name();
                if !seen.insert(name) {
                    return Err(RegistryError::DuplicateChild {
                        parent: suite.name.clone(),
                        name: name.to_string(),
                    });
                }
                ids.push(self.insert(decls, children, child, Some(id))?);
            }
            self.nodes[id.0].kind = NodeKind::Suite(ids);
        }
        Ok(id)
    }

    #[must_use]
    pub const fn root(&self) -> NodeId {
        NodeId(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A built tree always holds at least its root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id.0].kind {
            NodeKind::Suite(children) => children,
            NodeKind::Test(_) => &[],
        }
    }

    /// All node ids in pre-order.
    pub fn preorder(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Test node ids in pre-order.
    pub fn leaves(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.preorder().filter(|&id| self.node(id).is_test())
    }

    /// The node itself followed by each ancestor up to the root.
    pub fn lineage(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), |&cur| self.nodes[cur.0].parent)
    }

    /// Look up a node by its full path.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.path == path).map(NodeId)
    }

    /// Nearest explicit setup, or `None` when the walk reaches a `None` slot or the root.
    #[must_use]
    pub fn resolve_setup(&self, id: NodeId) -> Option<TestFn> {
        self.resolve_fixture(id, Node::setup)
    }

    #[must_use]
    pub fn resolve_teardown(&self, id: NodeId) -> Option<TestFn> {
        self.resolve_fixture(id, Node::teardown)
    }

    fn resolve_fixture(&self, id: NodeId, slot: fn(&Node) -> Fixture) -> Option<TestFn> {
        for cur in self.lineage(id) {
            match slot(self.node(cur)) {
                Fixture::Explicit(f) => return Some(f),
                Fixture::None => return None,
                Fixture::Inherited => {}
            }
        }
        None
    }

    /// First non-inherited timeout on the lineage; `None` means "use the configured default".
    #[must_use]
    pub fn resolve_timeout(&self, id: NodeId) -> Option<Timeout> {
        self.lineage(id)
            .map(|cur| self.node(cur).timeout)
            .find(|t| *t != Timeout::Inherited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_a() {
        std::hint::black_box(1);
    }
    fn fixture_b() {
        std::hint::black_box(2);
    }
    fn body() {}

    fn addr(f: Option<TestFn>) -> Option<usize> {
        f.map(|f| f as usize)
    }

    fn sample() -> SuiteTree {
        Registry::new()
            .suite(Suite::new("all").setup(fixture_a))
            .suite(
                Suite::new("math")
                    .within("all")
                    .setup_fixture(Fixture::Inherited)
                    .teardown(fixture_b),
            )
            .test(
                Test::new("add", body)
                    .within("math")
                    .setup_fixture(Fixture::Inherited)
                    .teardown_fixture(Fixture::Inherited),
            )
            .test(Test::new("sub", body).within("math").setup_fixture(Fixture::None))
            .suite(Suite::new("io").within("all").timeout(Timeout::Forever))
            .test(Test::new("read", body).within("io"))
            .test(Test::new("top", body).within("all").timeout(Timeout::After(Duration::ZERO)))
            .build()
            .unwrap()
    }

    #[test]
    fn ids_follow_preorder_and_registration_order() {
        let tree = sample();
        let paths: Vec<&str> = tree.preorder().map(|id| tree.node(id).path()).collect();
        assert_eq!(
            paths,
            [
                "all",
                "all::math",
                "all::math::add",
                "all::math::sub",
                "all::io",
                "all::io::read",
                "all::top",
            ]
        );
        assert_eq!(tree.leaves().count(), 4);
        assert_eq!(tree.node(tree.find("all::io::read").unwrap()).depth(), 2);
    }

    #[test]
    fn fixtures_resolve_to_nearest_explicit_ancestor() {
        let tree = sample();
        let add = tree.find("all::math::add").unwrap();
        assert_eq!(addr(tree.resolve_setup(add)), Some(fixture_a as usize));
        assert_eq!(addr(tree.resolve_teardown(add)), Some(fixture_b as usize));

        let read = tree.find("all::io::read").unwrap();
        assert!(tree.resolve_teardown(read).is_none());
    }

    #[test]
    fn fixtures_default_to_none_below_an_explicit_suite() {
        let tree = Registry::new()
            .suite(Suite::new("all"))
            .suite(Suite::new("db").within("all").setup(fixture_a).teardown(fixture_b))
            .test(Test::new("query", body).within("db"))
            .build()
            .unwrap();
        let query = tree.find("all::db::query").unwrap();
        assert!(tree.resolve_setup(query).is_none());
        assert!(tree.resolve_teardown(query).is_none());
        let db = tree.find("all::db").unwrap();
        assert_eq!(addr(tree.node(db).setup().explicit()), Some(fixture_a as usize));
    }

    #[test]
    fn explicit_none_stops_inheritance() {
        let tree = sample();
        let sub = tree.find("all::math::sub").unwrap();
        assert!(tree.resolve_setup(sub).is_none());
    }

    #[test]
    fn timeouts_resolve_through_lineage() {
        let tree = sample();
        let read = tree.find("all::io::read").unwrap();
        assert_eq!(tree.resolve_timeout(read), Some(Timeout::Forever));
        let add = tree.find("all::math::add").unwrap();
        assert_eq!(tree.resolve_timeout(add), None);
        let top = tree.find("all::top").unwrap();
        assert_eq!(tree.resolve_timeout(top), Some(Timeout::None));
    }

    #[test]
    fn root_may_not_inherit_fixture() {
        let err = Registry::new()
            .suite(Suite::new("all").teardown_fixture(Fixture::Inherited))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::InheritedRoot {
                node: "all".into(),
                fixture: "teardown",
            }
        );
    }

    #[test]
    fn cycle_is_rejected() {
        let err = Registry::new()
            .suite(Suite::new("all"))
            .suite(Suite::new("a").within("b"))
            .suite(Suite::new("b").within("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::Cycle(ref chain) if chain.len() == 3), "{err}");
    }

    #[test]
    fn root_count_is_checked() {
        assert_eq!(Registry::new().build().unwrap_err(), RegistryError::NoRoot);
        let err = Registry::new()
            .suite(Suite::new("a"))
            .suite(Suite::new("b"))
            .build()
            .unwrap_err();
        assert_eq!(err, RegistryError::MultipleRoots(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn parent_references_are_checked() {
        let err = Registry::new()
            .suite(Suite::new("all"))
            .test(Test::new("t", body).within("nope"))
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownParent { .. }));

        let err = Registry::new()
            .suite(Suite::new("all"))
            .test(Test::new("t", body).within("all"))
            .test(Test::new("u", body).within("t"))
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::ParentIsTest { .. }));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = Registry::new()
            .suite(Suite::new("all"))
            .test(Test::new("t", body).within("all"))
            .test(Test::new("t", body).within("all"))
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateChild { .. }));

        let err = Registry::new()
            .suite(Suite::new("all"))
            .suite(Suite::new("all").within("all"))
            .build()
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateSuite("all".into()));
    }

    #[test]
    fn same_test_name_in_different_suites_is_allowed() {
        let tree = Registry::new()
            .suite(Suite::new("all"))
            .suite(Suite::new("x").within("all"))
            .suite(Suite::new("y").within("all"))
            .test(Test::new("t", body).within("x"))
            .test(Test::new("t", body).within("y"))
            .build()
            .unwrap();
        assert!(tree.find("all::x::t").is_some());
        assert!(tree.find("all::y::t").is_some());
    }

    #[test]
    fn single_test_may_be_the_root() {
        let tree = Registry::new().test(Test::new("only", body)).build().unwrap();
        assert!(tree.node(tree.root()).is_test());
        assert_eq!(tree.leaves().count(), 1);
    }
}
