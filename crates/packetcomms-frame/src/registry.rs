//! Name ↔ id mapping shared by both ends of a connection.
//!
//! Ids are positional: 0 is "Invalid", 1 is "Control", and the supplied
//! names take 2, 3, ... in order. Nothing is negotiated on the wire, so the
//! two peers must be built from the same list.

use std::collections::HashMap;

use crate::message::TypeId;

/// Name of the reserved id 0.
pub const INVALID_NAME: &str = "Invalid";
/// Name of the reserved id 1.
pub const CONTROL_NAME: &str = "Control";

/// Immutable, bidirectional type-name registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRegistry {
    names: Vec<String>,
    ids: HashMap<String, TypeId>,
}

impl TypeRegistry {
    /// Build a registry from an ordered list of application type names.
    ///
    /// A repeated name still consumes an id (so positions match the peer's)
    /// but [`to_id`](Self::to_id) resolves to its first occurrence. Names
    /// that collide with the reserved ones never shadow ids 0 and 1.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut all = vec![INVALID_NAME.to_string(), CONTROL_NAME.to_string()];
        all.extend(names.into_iter().map(Into::into));

        let mut ids = HashMap::with_capacity(all.len());
        for (index, name) in all.iter().enumerate() {
            ids.entry(name.clone())
                .or_insert(TypeId(index as u32));
        }

        Self { names: all, ids }
    }

    /// Id for `name`, or [`TypeId::INVALID`] if the name is unknown.
    pub fn to_id(&self, name: &str) -> TypeId {
        self.ids.get(name).copied().unwrap_or(TypeId::INVALID)
    }

    /// Name for `id`, or `"Invalid"` if the id is unknown.
    pub fn to_name(&self, id: TypeId) -> &str {
        self.names
            .get(id.0 as usize)
            .map(String::as_str)
            .unwrap_or(INVALID_NAME)
    }

    /// True if `id` may be sent: Control or any application type.
    pub fn contains(&self, id: TypeId) -> bool {
        !id.is_invalid() && (id.0 as usize) < self.names.len()
    }

    /// Total number of ids, reserved ones included.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when no application types were registered.
    pub fn is_empty(&self) -> bool {
        self.names.len() <= TypeId::FIRST_APPLICATION.0 as usize
    }

    /// Highest assigned id.
    pub fn max_id(&self) -> TypeId {
        TypeId((self.names.len() - 1) as u32)
    }

    /// Every sendable id in ascending order (Control first).
    pub fn ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        (TypeId::CONTROL.0..self.names.len() as u32).map(TypeId)
    }

    /// Application types as `(id, name)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &str)> + '_ {
        self.names
            .iter()
            .enumerate()
            .skip(TypeId::FIRST_APPLICATION.0 as usize)
            .map(|(index, name)| (TypeId(index as u32), name.as_str()))
    }

    /// Application type names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.iter().map(|(_, name)| name)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}
