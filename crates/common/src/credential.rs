//! Monotonic UID/GID allocation for sandboxed executions.

use std::sync::atomic::{AtomicU32, Ordering};

/// A process-wide identifier handed to a single execution: never reused for
/// the lifetime of the allocator, so two executions never share a credential
/// even when they run inside namespaces built from the same base mapping.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Credential {
    pub uid: u32,
    pub gid: u32,
}

/// Starting point for generated credentials, chosen to stay clear of any
/// system account range inside the container's user namespace.
const BASE: u32 = 10000;

/// Atomically hands out ascending `Credential`s. Cheap to clone (an `Arc`
/// around the counter), safe to share across every container in the pool.
#[derive(Debug, Default)]
pub struct CredentialGenerator {
    next: AtomicU32,
}

impl CredentialGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(0),
        }
    }

    /// Returns the next unused credential.
    pub fn next(&self) -> Credential {
        let offset = self.next.fetch_add(1, Ordering::SeqCst);
        let id = BASE + offset;
        Credential { uid: id, gid: id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_ascending_unique_credentials() {
        let gen = CredentialGenerator::new();
        let a = gen.next();
        let b = gen.next();
        let c = gen.next();

        assert_eq!(a.uid, BASE);
        assert_eq!(b.uid, BASE + 1);
        assert_eq!(c.uid, BASE + 2);
        assert_eq!(a.uid, a.gid);
        assert_ne!(a.uid, b.uid);
    }
}
