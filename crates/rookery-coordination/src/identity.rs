//! Client node identity: naming, parsing, and ordering.
//!
//! Every participant in a recipe is represented in the store by one
//! sequential node whose name starts with that client's prefix. The
//! prefix is a deterministic join of percent-encoded identity
//! components with a trailing separator, so the store-assigned sequence
//! suffix always lands in its own component:
//!
//! ```text
//! <enc(type)>-<enc(client)>-<sequence>     type set
//! <enc(client)>-<sequence>                 bare client id
//! ```
//!
//! Components are validated against the separator at construction, so
//! a node name always splits unambiguously. The group component never
//! appears in the node name; a non-default group namespaces the parent
//! path instead, keeping groups out of each other's sibling lists.

use std::cmp::Ordering;

use percent_encoding::AsciiSet;
use percent_encoding::NON_ALPHANUMERIC;
use percent_encoding::percent_decode_str;
use percent_encoding::utf8_percent_encode;
use rookery_constants::coordination::DEFAULT_NODE_COMPONENT;
use rookery_constants::coordination::NODE_COMPONENT_SEPARATOR;
use uuid::Uuid;

use crate::error::CoordinationError;

/// Characters escaped when encoding an identity component.
///
/// Everything outside alphanumerics and `_ . ! ~ * ' ( )`. The
/// separator itself is rejected by validation before encoding, so an
/// encoded component can never contain a raw separator.
const COMPONENT_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Generate a unique client id: a uuid v4 with the dashes stripped.
///
/// The stripped form is 32 hex characters and therefore can never
/// collide with the component separator.
pub fn generate_client_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn validate_component(component: &str) -> Result<(), CoordinationError> {
    if component.contains(NODE_COMPONENT_SEPARATOR) {
        return Err(CoordinationError::InvalidComponent {
            component: component.to_string(),
        });
    }
    Ok(())
}

fn encode_component(component: &str) -> String {
    utf8_percent_encode(component, COMPONENT_ESCAPES).to_string()
}

fn decode_component(component: &str) -> Result<String, CoordinationError> {
    percent_decode_str(component)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| CoordinationError::InvalidNodeFormat {
            node: component.to_string(),
        })
}

/// Identity of one client within a coordination path.
///
/// Immutable once constructed; every component is validated against
/// the reserved separator at construction time, so deriving node names
/// from a constructed identity cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientNodeIdentity {
    client_id: String,
    type_id: String,
    group_id: String,
}

impl ClientNodeIdentity {
    /// Create an identity with the given client id and default type and
    /// group components.
    pub fn new(client_id: impl Into<String>) -> Result<Self, CoordinationError> {
        let client_id = client_id.into();
        validate_component(&client_id)?;
        Ok(Self {
            client_id,
            type_id: DEFAULT_NODE_COMPONENT.to_string(),
            group_id: DEFAULT_NODE_COMPONENT.to_string(),
        })
    }

    /// Create an identity with a freshly generated client id.
    pub fn generated() -> Self {
        Self {
            client_id: generate_client_id(),
            type_id: DEFAULT_NODE_COMPONENT.to_string(),
            group_id: DEFAULT_NODE_COMPONENT.to_string(),
        }
    }

    /// Set the type component.
    pub fn with_type_id(mut self, type_id: impl Into<String>) -> Result<Self, CoordinationError> {
        let type_id = type_id.into();
        validate_component(&type_id)?;
        self.type_id = type_id;
        Ok(self)
    }

    /// Set the group component.
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Result<Self, CoordinationError> {
        let group_id = group_id.into();
        validate_component(&group_id)?;
        self.group_id = group_id;
        Ok(self)
    }

    /// The client id component.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The type component (`"none"` when unset).
    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    /// The group component (`"none"` when unset).
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// The client node prefix: encoded components joined in canonical
    /// order with a trailing separator.
    ///
    /// The store appends the sequence suffix directly after the
    /// trailing separator, so the suffix is always the final component
    /// of the created node name.
    pub fn prefix(&self) -> String {
        let mut components: Vec<String> = Vec::with_capacity(3);
        if self.type_id != DEFAULT_NODE_COMPONENT {
            components.push(encode_component(&self.type_id));
        }
        components.push(encode_component(&self.client_id));
        components.push(String::new());
        components.join(&NODE_COMPONENT_SEPARATOR.to_string())
    }

    /// The parent path this identity's nodes live under.
    ///
    /// A non-default group selects a per-group sub-path of `base`.
    pub fn parent_path(&self, base: &str) -> String {
        if self.group_id == DEFAULT_NODE_COMPONENT {
            base.to_string()
        } else {
            format!("{base}/{}", encode_component(&self.group_id))
        }
    }
}

/// Components recovered from a client node name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedNode {
    /// The client id component.
    pub client: String,
    /// The type component, when the name carried one.
    pub type_id: Option<String>,
    /// The sequence number, when parsed as a sequence node.
    pub sequence: Option<u64>,
}

/// Parse a client node name (the name only, no parent path).
///
/// Accepts exactly one or two leading non-sequence components: a bare
/// client id, or type then client id. With `has_sequence` the final
/// component must parse as a non-negative integer. Every other shape
/// fails with [`CoordinationError::InvalidNodeFormat`].
pub fn parse_client_node(node: &str, has_sequence: bool) -> Result<ParsedNode, CoordinationError> {
    let invalid = || CoordinationError::InvalidNodeFormat {
        node: node.to_string(),
    };

    let parts: Vec<&str> = node.split(NODE_COMPONENT_SEPARATOR).collect();
    let pre_sequence_count = if has_sequence {
        parts.len().checked_sub(1).ok_or_else(invalid)?
    } else {
        parts.len()
    };

    let (client, type_id) = match pre_sequence_count {
        1 => (decode_component(parts[0])?, None),
        2 => (decode_component(parts[1])?, Some(decode_component(parts[0])?)),
        _ => return Err(invalid()),
    };

    let sequence = if has_sequence {
        Some(parts[pre_sequence_count].parse::<u64>().map_err(|_| invalid())?)
    } else {
        None
    };

    Ok(ParsedNode {
        client,
        type_id,
        sequence,
    })
}

/// Total order over two sequence node names by numeric sequence value.
///
/// Fails loudly when either name is not a sequence node; callers must
/// not treat foreign data in the namespace as comparable.
pub fn compare_by_sequence(a: &str, b: &str) -> Result<Ordering, CoordinationError> {
    let seq_a = parse_client_node(a, true)?.sequence;
    let seq_b = parse_client_node(b, true)?.sequence;
    Ok(seq_a.cmp(&seq_b))
}

/// Sort sequence node names in ascending numeric sequence order.
///
/// Every name is parsed up front so a malformed name fails the whole
/// sort instead of silently landing anywhere.
pub fn sorted_by_sequence(nodes: Vec<String>) -> Result<Vec<String>, CoordinationError> {
    let mut keyed: Vec<(u64, String)> = nodes
        .into_iter()
        .map(|node| {
            let sequence = parse_client_node(&node, true)?.sequence.unwrap_or_default();
            Ok((sequence, node))
        })
        .collect::<Result<_, CoordinationError>>()?;
    keyed.sort_by_key(|(sequence, _)| *sequence);
    Ok(keyed.into_iter().map(|(_, node)| node).collect())
}
