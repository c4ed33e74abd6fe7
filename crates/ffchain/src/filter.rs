use std::fmt;

/// A single stage in a filter chain, e.g. `scale=width=1280:height=-1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterNode {
    pub name: String,
    /// Arguments in insertion order; serialized verbatim.
    pub args: Vec<(String, String)>,
}

impl FilterNode {
    /// Create a filter with no arguments
    pub fn new(name: impl Into<String>) -> Self {
        FilterNode {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Create a filter from ordered key/value pairs
    pub fn with_args<K, V>(name: impl Into<String>, args: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut node = FilterNode::new(name);
        for (key, value) in args {
            node = node.arg(key.as_ref(), value.as_ref());
        }
        node
    }

    /// Add an argument. Re-setting an existing key keeps its original position.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.args.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.args.push((key, value)),
        }
        self
    }
}

impl fmt::Display for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            return f.write_str(&self.name);
        }
        let args: Vec<String> = self
            .args
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{}={}", self.name, args.join(":"))
    }
}

/// An append-only sequence of filter stages applied in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterChain {
    nodes: Vec<FilterNode>,
}

impl FilterChain {
    pub fn new() -> Self {
        FilterChain::default()
    }

    /// Attach a stage at the tail of the chain
    pub fn push(&mut self, node: FilterNode) -> &mut Self {
        self.nodes.push(node);
        self
    }

    pub fn nodes(&self) -> &[FilterNode] {
        &self.nodes
    }

    pub fn head(&self) -> Option<&FilterNode> {
        self.nodes.first()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl From<FilterNode> for FilterChain {
    fn from(node: FilterNode) -> Self {
        FilterChain { nodes: vec![node] }
    }
}

impl fmt::Display for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.nodes.iter().map(|n| n.to_string()).collect();
        f.write_str(&rendered.join(","))
    }
}
