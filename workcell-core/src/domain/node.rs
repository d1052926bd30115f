//! Node naming

/// Suffix every node registers under
pub const NODE_SUFFIX: &str = "_node";

/// Registry name of a node, e.g. `marker` -> `marker_node`
pub fn node_id(name: &str) -> String {
    format!("{name}{NODE_SUFFIX}")
}

/// Topic on which a node publishes its errors, e.g. `marker_error`
pub fn error_topic(name: &str) -> String {
    format!("{name}_error")
}
