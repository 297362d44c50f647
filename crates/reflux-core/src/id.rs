//! Strongly-typed identifiers, ordering keys, and type keys.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies a single action record.
///
/// Assigned by the dispatch context when a pending action becomes
/// visible to the pipeline. Never reused within a context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(pub u64);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ActionId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Monotonically increasing cycle counter.
///
/// Incremented each time a dispatch context runs one full pass of
/// middleware, reducers, notification, and cleanup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CycleId(pub u64);

impl CycleId {
    /// The cycle after this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CycleId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Deterministic replay key for submitted actions.
///
/// Local submissions receive monotonically assigned keys; parallel
/// producers choose their own keys and are responsible for keeping them
/// non-colliding within a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SortKey(pub u64);

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SortKey {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Generation of a multi-writer buffer.
///
/// Incremented at every buffer rotation. A writer whose generation no
/// longer matches the live buffer is stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenerationId(pub u64);

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for GenerationId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Explicit position of a middleware handler within its chain.
///
/// Lower keys run first. Equal keys fall back to declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct OrderKey(pub i32);

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for OrderKey {
    fn from(v: i32) -> Self {
        Self(v)
    }
}

/// Counter for unique [`ContextId`] allocation.
static CONTEXT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a dispatch context.
///
/// Allocated from a process-wide monotonic counter via [`ContextId::next`],
/// so two contexts never share an ID even if one is dropped and another
/// created in its place.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Allocate a fresh, unique context ID. Thread-safe.
    pub fn next() -> Self {
        Self(CONTEXT_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Runtime identity of a registered action or state type.
///
/// Equality and hashing use only the [`TypeId`]; the name is carried
/// for diagnostics.
#[derive(Clone, Copy, Debug)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// The key for `T`.
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The underlying [`TypeId`].
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// Fully-qualified type name, for log messages.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The type name without its module path.
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        match base.rfind("::") {
            Some(idx) => &self.name[idx + 2..],
            None => self.name,
        }
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Notification priority tier for a state type's change events.
///
/// Declared in drain order: every `Critical` event is delivered before
/// any `High` event, and every `High` before any `Normal`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Priority {
    /// Delivered first.
    Critical,
    /// Delivered after all critical events.
    High,
    /// Delivered last. The default tier.
    #[default]
    Normal,
}

impl Priority {
    /// All tiers, highest first.
    pub const ALL: [Priority; 3] = [Priority::Critical, Priority::High, Priority::Normal];

    /// Dense index of the tier (0 = highest).
    pub fn index(self) -> usize {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Normal => write!(f, "normal"),
        }
    }
}

/// Execution strategy chosen for a handler at registration time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// One call per record, with access to host services.
    General,
    /// Batch execution restricted to a per-cycle read set.
    Precompiled,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::General => write!(f, "general"),
            Self::Precompiled => write!(f, "precompiled"),
        }
    }
}

/// Which buffer flavor an action entered the pipeline through.
///
/// Within one action type, local records are visible before parallel
/// records; each lane is ordered by its own sort keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lane {
    /// Submitted by the orchestrating thread.
    Local,
    /// Submitted by a worker through a parallel writer.
    Parallel,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Health;

    #[test]
    fn context_ids_are_unique() {
        let a = ContextId::next();
        let b = ContextId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }

    #[test]
    fn type_key_equality_ignores_name() {
        assert_eq!(TypeKey::of::<Health>(), TypeKey::of::<Health>());
        assert_ne!(TypeKey::of::<Health>(), TypeKey::of::<u32>());
    }

    #[test]
    fn type_key_short_name_strips_path() {
        assert_eq!(TypeKey::of::<Health>().short_name(), "Health");
        assert_eq!(TypeKey::of::<u32>().short_name(), "u32");
        assert_eq!(format!("{}", TypeKey::of::<Health>()), "Health");
    }

    #[test]
    fn priority_tiers_sort_highest_first() {
        let mut tiers = vec![Priority::Normal, Priority::Critical, Priority::High];
        tiers.sort();
        assert_eq!(tiers.as_slice(), &Priority::ALL);
        for (i, p) in Priority::ALL.iter().enumerate() {
            assert_eq!(p.index(), i);
        }
    }

    #[test]
    fn local_lane_orders_before_parallel() {
        assert!(Lane::Local < Lane::Parallel);
    }

    #[test]
    fn cycle_next_increments() {
        assert_eq!(CycleId(4).next(), CycleId(5));
    }
}
