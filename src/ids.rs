use uuid::Uuid;

/// Opaque 128-bit directory identity, assigned by the host filesystem.
///
/// The cache never invents a `DirId` — it only ever receives one from the
/// host (via a [`crate::host::DirHandle`]) and uses it as a table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirId(Uuid);

impl DirId {
    /// Wrap a host-assigned identity.
    pub const fn from_uuid(id: Uuid) -> Self {
        DirId(id)
    }

    /// The nil id, used only in tests and for the "unknown child" NE sentinel.
    pub const fn nil() -> Self {
        DirId(Uuid::nil())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for DirId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DirId {
    fn from(id: Uuid) -> Self {
        DirId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_ids_hash_differently() {
        let a = DirId::from_uuid(Uuid::from_u128(1));
        let b = DirId::from_uuid(Uuid::from_u128(2));
        assert_ne!(a, b);
        assert_eq!(a, DirId::from_uuid(Uuid::from_u128(1)));
    }
}
