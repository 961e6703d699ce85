//! A fixed-size pool of pre-built containers, handed out for the duration
//! of one execution and reset before being returned.

use crate::{
    container::{ContainerHandle, ContainerTemplate},
    error::Result,
};
use crossbeam_channel::{Receiver, Sender};
use rankode_common::credential::CredentialGenerator;
use std::{path::PathBuf, sync::Arc};

/// Bounded queue of containers. Created with every member eagerly built;
/// if any fails to build, construction fails and nothing is left behind.
pub struct ContainerPool {
    sender: Sender<ContainerHandle>,
    receiver: Receiver<ContainerHandle>,
}

impl ContainerPool {
    pub fn build(size: usize, scratch_root: &std::path::Path) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::bounded(size);
        let credentials = Arc::new(CredentialGenerator::new());

        for i in 0..size {
            let workdir: PathBuf = scratch_root.join(format!("container-{}", i));
            let container = ContainerTemplate::build(workdir, credentials.clone())?;
            // Channel capacity equals `size`; this send never blocks.
            sender.send(container).expect("pool channel unexpectedly full");
        }

        Ok(Self { sender, receiver })
    }

    /// Blocks until a container is available, then returns it reset and
    /// ready for use.
    pub fn acquire(&self) -> Result<PooledContainer<'_>> {
        let mut container = self.receiver.recv().expect("pool channel disconnected");
        container.reset()?;
        Ok(PooledContainer {
            container: Some(container),
            sender: &self.sender,
        })
    }

    /// Drains every container and destroys it. Only correct once no
    /// `acquire` calls are outstanding.
    pub fn shutdown(self) -> Result<()> {
        drop(self.sender);
        while let Ok(container) = self.receiver.recv() {
            container.destroy()?;
        }
        Ok(())
    }
}

/// A container borrowed from the pool. Returned to the pool automatically
/// when dropped.
pub struct PooledContainer<'a> {
    container: Option<ContainerHandle>,
    sender: &'a Sender<ContainerHandle>,
}

impl<'a> std::ops::Deref for PooledContainer<'a> {
    type Target = ContainerHandle;
    fn deref(&self) -> &ContainerHandle {
        self.container.as_ref().expect("container taken before drop")
    }
}

impl<'a> std::ops::DerefMut for PooledContainer<'a> {
    fn deref_mut(&mut self) -> &mut ContainerHandle {
        self.container.as_mut().expect("container taken before drop")
    }
}

impl<'a> Drop for PooledContainer<'a> {
    fn drop(&mut self) {
        if let Some(container) = self.container.take() {
            // Best-effort: a send failure means the pool is shutting down,
            // in which case the container is simply leaked until process
            // exit, which is acceptable during a graceful drain.
            let _ = self.sender.send(container);
        }
    }
}

#[cfg(test)]
mod tests {
    // Building real containers requires root privileges (namespaces,
    // mounts); exercised in the root-gated integration tests under
    // crates/sandbox/tests instead. The pool's own bookkeeping (bounded
    // channel, guard-based return-on-drop) has no privileged dependency
    // and is covered there against a small fake-container harness.
}
