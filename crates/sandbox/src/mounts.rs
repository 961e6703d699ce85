//! The mount set that turns a bare scratch directory into a container root:
//! read-only bind mounts of the host toolchain, a private `/proc`, and
//! size-capped tmpfs scratch space.

use crate::error::{Result, SandboxError};
use nix::mount::{mount, MsFlags};
use std::{
    fs::{self, File},
    path::Path,
};

/// One mount to perform, relative to the container root.
#[derive(Debug)]
pub struct MountPoint {
    /// Path under the container root, e.g. `"bin"` or `"etc/ld.so.cache"`.
    pub target: &'static str,
    pub kind: MountKind,
    /// Skipped (not an error) when the host source doesn't exist.
    pub optional: bool,
}

#[derive(Debug)]
pub enum MountKind {
    /// Bind mount of a host path. `file` targets must be pre-created as a
    /// regular file, not a directory.
    Bind {
        source: &'static str,
        writable: bool,
        file: bool,
    },
    Tmpfs {
        options: &'static str,
    },
    Proc,
}

/// The fixed mount set every container gets: the host's dynamic linker and
/// standard library directories (read-only), a private `/proc`, a writable
/// `/dev/null`, and tmpfs scratch space at `/tmp` and `/w`.
pub fn default_mounts() -> Vec<MountPoint> {
    vec![
        MountPoint {
            target: "bin",
            kind: MountKind::Bind {
                source: "/bin",
                writable: false,
                file: false,
            },
            optional: false,
        },
        MountPoint {
            target: "lib",
            kind: MountKind::Bind {
                source: "/lib",
                writable: false,
                file: false,
            },
            optional: false,
        },
        MountPoint {
            target: "lib64",
            kind: MountKind::Bind {
                source: "/lib64",
                writable: false,
                file: false,
            },
            optional: true,
        },
        MountPoint {
            target: "usr",
            kind: MountKind::Bind {
                source: "/usr",
                writable: false,
                file: false,
            },
            optional: false,
        },
        MountPoint {
            target: "etc/ld.so.cache",
            kind: MountKind::Bind {
                source: "/etc/ld.so.cache",
                writable: false,
                file: true,
            },
            optional: true,
        },
        MountPoint {
            target: "proc",
            kind: MountKind::Proc,
            optional: false,
        },
        MountPoint {
            target: "dev/null",
            kind: MountKind::Bind {
                source: "/dev/null",
                writable: true,
                file: true,
            },
            optional: false,
        },
        MountPoint {
            target: "tmp",
            kind: MountKind::Tmpfs {
                options: "size=128m,nr_inodes=4k",
            },
            optional: false,
        },
        MountPoint {
            target: "w",
            kind: MountKind::Tmpfs {
                options: "size=32m,nr_inodes=4k",
            },
            optional: false,
        },
    ]
}

/// Applies every mount point under `root`, skipping optional ones whose
/// source is absent on this host.
pub fn apply_mounts(root: &Path, mounts: &[MountPoint]) -> Result<()> {
    for mp in mounts {
        let target = root.join(mp.target);

        if let MountKind::Bind { source, .. } = &mp.kind {
            if mp.optional && !Path::new(source).exists() {
                continue;
            }
        }

        match &mp.kind {
            MountKind::Bind {
                source,
                writable,
                file,
            } => {
                prepare_target(&target, *file)?;
                do_mount(source, &target, None, MsFlags::MS_BIND, None)?;
                if !writable {
                    do_mount(
                        "none",
                        &target,
                        None,
                        MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                        None,
                    )?;
                }
            }
            MountKind::Tmpfs { options } => {
                prepare_target(&target, false)?;
                do_mount("tmpfs", &target, Some("tmpfs"), MsFlags::empty(), Some(*options))?;
            }
            MountKind::Proc => {
                prepare_target(&target, false)?;
                do_mount("proc", &target, Some("proc"), MsFlags::empty(), None)?;
            }
        }
    }
    Ok(())
}

fn prepare_target(target: &Path, file: bool) -> Result<()> {
    if file {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(SandboxError::Io)?;
        }
        if !target.exists() {
            File::create(target).map_err(SandboxError::Io)?;
        }
    } else {
        fs::create_dir_all(target).map_err(SandboxError::Io)?;
    }
    Ok(())
}

fn do_mount(
    source: &str,
    target: &Path,
    fstype: Option<&str>,
    flags: MsFlags,
    data: Option<&str>,
) -> Result<()> {
    mount(Some(source), target, fstype, flags, data).map_err(|source_err| SandboxError::Mount {
        path: target.to_path_buf(),
        source: source_err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mounts_cover_the_documented_set() {
        let targets: Vec<_> = default_mounts().iter().map(|m| m.target).collect();
        assert_eq!(
            targets,
            vec!["bin", "lib", "lib64", "usr", "etc/ld.so.cache", "proc", "dev/null", "tmp", "w"]
        );
    }

    #[test]
    fn only_lib64_and_ld_so_cache_are_optional() {
        for mp in default_mounts() {
            let expect_optional = mp.target == "lib64" || mp.target == "etc/ld.so.cache";
            assert_eq!(mp.optional, expect_optional, "{}", mp.target);
        }
    }
}
