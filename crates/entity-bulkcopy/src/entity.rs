//! Entity introspection traits.
//!
//! The flattener never sees concrete entity structs. It reads rows through
//! these three traits:
//!
//! - [`Fields`]: one link of named field access, the capability a property
//!   path is walked over. Owned components (address-in-contact style nesting)
//!   only need this.
//! - [`Entity`]: adds a runtime type tag for per-row accessor dispatch when
//!   subtypes share a table. Object-safe, so heterogeneous collections can be
//!   modeled either as enums over subtypes or as `Box<dyn Entity>`.
//! - [`EntityType`]: adds the static tag of a declared element type, used by
//!   the entry points to resolve the derived-type closure before any row is
//!   read.
//!
//! A null link anywhere along a path is reported by returning `None`; the
//! flattener converts it to a NULL field value rather than an error, so a
//! row with a partially populated object graph never aborts the batch.

use crate::value::SqlValue;

/// One step of field resolution.
pub enum Field<'a> {
    /// A scalar column value.
    Value(SqlValue<'static>),
    /// A complex component or navigation reference to keep walking into.
    Nested(&'a dyn Fields),
}

/// Named field access over an object, one link at a time.
pub trait Fields {
    /// Resolve a single field by name.
    ///
    /// Returns `None` when the field is absent or the link is null.
    fn field(&self, name: &str) -> Option<Field<'_>>;
}

/// An object that can contribute rows to a mapped table.
pub trait Entity: Fields {
    /// Runtime type tag, matched against
    /// [`TypeColumnSet::type_tag`](crate::metadata::TypeColumnSet) to select
    /// the accessor vector for this row.
    fn type_tag(&self) -> &'static str;
}

/// Static type identity of a declared element type.
///
/// For a base type inserted polymorphically, `TAG` names the base; the
/// mapping provider expands it to the concrete-type closure.
pub trait EntityType: Entity {
    const TAG: &'static str;
}

impl<'a, T: Fields + ?Sized> Fields for &'a T {
    fn field(&self, name: &str) -> Option<Field<'_>> {
        (**self).field(name)
    }
}

impl<T: Fields + ?Sized> Fields for Box<T> {
    fn field(&self, name: &str) -> Option<Field<'_>> {
        (**self).field(name)
    }
}

impl<'a, T: Entity + ?Sized> Entity for &'a T {
    fn type_tag(&self) -> &'static str {
        (**self).type_tag()
    }
}

impl<T: Entity + ?Sized> Entity for Box<T> {
    fn type_tag(&self) -> &'static str {
        (**self).type_tag()
    }
}

/// Walk a property path over an entity, short-circuiting on null links.
///
/// Returns `None` when any link is null or missing, or when the terminal
/// field is itself a nested reference (plain navigations carry no scalar).
pub fn walk_path(root: &dyn Fields, path: &[String]) -> Option<SqlValue<'static>> {
    let (last, prefix) = path.split_last()?;

    let mut current: &dyn Fields = root;
    for link in prefix {
        match current.field(link)? {
            Field::Nested(next) => current = next,
            // A scalar mid-path means the metadata disagrees with the
            // object shape; treat it like a missing link.
            Field::Value(_) => return None,
        }
    }

    match current.field(last)? {
        Field::Value(v) => Some(v),
        Field::Nested(_) => None,
    }
}
