//! Host-side value representation shared by every host implementation.
//!
//! A [`HostValue`] mirrors the editor's tagged `typval` union. Containers are
//! carried as opaque identities ([`ListId`], [`DictId`]); whether a given
//! `HostValue` *owns* a reference on its container is a property of where it
//! came from, spelled out on each [`HostServices`](super::host::HostServices)
//! method.

use std::fmt;

/// Maximum recursion depth for value conversion in either direction.
pub const MAX_DEPTH: usize = 100;

/// Identity of a host list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListId(usize);

/// Identity of a host dictionary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DictId(usize);

macro_rules! container_id {
    ($name:ident) => {
        impl $name {
            /// Wrap a raw identity (a pointer for the editor host, an arena
            /// slot for the in-process host).
            pub const fn from_raw(raw: usize) -> Self {
                Self(raw)
            }

            /// The raw identity.
            pub const fn as_raw(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

container_id!(ListId);
container_id!(DictId);

/// The editor's dynamically typed value.
#[derive(Clone, Debug, PartialEq)]
pub enum HostValue {
    /// Uninitialized / unknown (`VAR_UNKNOWN`)
    Unknown,
    /// Integer number
    Number(i64),
    /// Floating point number
    Float(f64),
    /// String; `None` is the editor's NULL string, which reads as empty
    String(Option<String>),
    /// Reference to a function, by name
    FuncRef(String),
    /// Reference to a list
    List(ListId),
    /// Reference to a dictionary
    Dict(DictId),
}

impl HostValue {
    /// Convenience constructor for a non-null string.
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(Some(s.into()))
    }

    /// Identity of the referenced container or function, if any.
    pub fn identity(&self) -> Option<IdentityKey> {
        match self {
            Self::List(id) => Some(IdentityKey::List(*id)),
            Self::Dict(id) => Some(IdentityKey::Dict(*id)),
            Self::FuncRef(name) => Some(IdentityKey::Func(name.clone())),
            _ => None,
        }
    }

    /// Whether this value carries a refcounted container.
    pub fn is_container(&self) -> bool {
        matches!(self, Self::List(_) | Self::Dict(_))
    }

    /// Name of the variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Number(_) => "number",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::FuncRef(_) => "funcref",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
        }
    }

    /// Render the value the way the editor's `echo` would for scalars.
    pub fn display_scalar(&self) -> Option<String> {
        match self {
            Self::Number(n) => Some(n.to_string()),
            Self::Float(f) => Some(format_float(*f)),
            Self::String(s) => Some(s.clone().unwrap_or_default()),
            Self::FuncRef(name) => Some(name.clone()),
            _ => None,
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

/// Normalized identity of a bridged host value.
///
/// Two function references with equal names are the same identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    List(ListId),
    Dict(DictId),
    Func(String),
    /// A function reference bound to the dictionary it was read from.
    Method(DictId, String),
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List(id) => write!(f, "list@{}", id),
            Self::Dict(id) => write!(f, "dict@{}", id),
            Self::Func(name) => write!(f, "function('{}')", name),
            Self::Method(dict, name) => write!(f, "dict@{}.{}", dict, name),
        }
    }
}

/// Tracks recursion depth during a conversion.
pub struct DepthGuard {
    max_depth: usize,
    current_depth: usize,
}

impl DepthGuard {
    /// Create a guard that fails past `max_depth` nested levels.
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            current_depth: 0,
        }
    }

    /// Enter a new depth level.
    ///
    /// Returns the limit when it is exceeded; the level is not entered then.
    pub fn enter(&mut self) -> Result<(), usize> {
        if self.current_depth >= self.max_depth {
            return Err(self.max_depth);
        }
        self.current_depth += 1;
        Ok(())
    }

    /// Exit a depth level.
    pub fn exit(&mut self) {
        self.current_depth = self.current_depth.saturating_sub(1);
    }

    /// Current nesting level.
    pub fn depth(&self) -> usize {
        self.current_depth
    }
}

impl Default for DepthGuard {
    fn default() -> Self {
        Self::new(MAX_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_of_values() {
        let list = HostValue::List(ListId::from_raw(0x10));
        assert_eq!(list.identity(), Some(IdentityKey::List(ListId::from_raw(0x10))));
        assert!(list.is_container());

        let f1 = HostValue::FuncRef("strlen".to_string());
        let f2 = HostValue::FuncRef("strlen".to_string());
        assert_eq!(f1.identity(), f2.identity());
        assert!(!f1.is_container());

        assert_eq!(HostValue::Number(3).identity(), None);
        assert_eq!(HostValue::String(None).identity(), None);
    }

    #[test]
    fn test_display_scalar() {
        assert_eq!(HostValue::Number(42).display_scalar().as_deref(), Some("42"));
        assert_eq!(HostValue::Float(2.0).display_scalar().as_deref(), Some("2.0"));
        assert_eq!(HostValue::Float(0.5).display_scalar().as_deref(), Some("0.5"));
        assert_eq!(HostValue::String(None).display_scalar().as_deref(), Some(""));
        assert_eq!(HostValue::Dict(DictId::from_raw(1)).display_scalar(), None);
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(IdentityKey::List(ListId::from_raw(255)).to_string(), "list@0xff");
        assert_eq!(
            IdentityKey::Func("Foo".to_string()).to_string(),
            "function('Foo')"
        );
        assert_eq!(
            IdentityKey::Method(DictId::from_raw(16), "Greet".to_string()).to_string(),
            "dict@0x10.Greet"
        );
    }

    #[test]
    fn test_depth_guard_limit() {
        let mut guard = DepthGuard::new(3);

        assert!(guard.enter().is_ok()); // depth 1
        assert!(guard.enter().is_ok()); // depth 2
        assert!(guard.enter().is_ok()); // depth 3
        assert_eq!(guard.enter(), Err(3));
        assert_eq!(guard.depth(), 3);

        guard.exit();
        assert!(guard.enter().is_ok());
    }

    #[test]
    fn test_depth_guard_default_ceiling() {
        let mut guard = DepthGuard::default();
        for _ in 0..MAX_DEPTH {
            assert!(guard.enter().is_ok());
        }
        assert!(guard.enter().is_err());
    }
}
