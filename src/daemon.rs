use tokio::select;

use crate::app_config;
use tracing::{debug, info};

mod managed_fuse {
    //! fuser only does a regular unmount when the `BackgroundSession` is dropped. We want to be
    //! aggressive and force an unmount if possible, so the mount point is never left wedged.
    use std::path::PathBuf;
    use std::time::Duration;

    use nix::errno::Errno;
    use path_fuse::fs::fuser::FuserAdapter;
    use path_fuse::fs::local::LocalPathFs;

    use super::{app_config, debug};
    use fuser::BackgroundSession;
    use tracing::error;

    pub struct FuseCoreScope {
        _session: BackgroundSession,
    }

    impl FuseCoreScope {
        fn spawn(
            config: &app_config::Config,
            source: PathBuf,
            mount_point: &std::path::Path,
            handle: tokio::runtime::Handle,
        ) -> Result<Self, std::io::Error> {
            let local_fs = LocalPathFs::new(source);
            let fuse_adapter = FuserAdapter::new(
                local_fs,
                config.adapter.options(),
                config.adapter.readdir_page_size(),
                handle,
            );

            let mut mount_opts = vec![
                fuser::MountOption::FSName("path-fuse".to_owned()),
                fuser::MountOption::RO,
                fuser::MountOption::NoDev,
                fuser::MountOption::DefaultPermissions,
            ];
            if config.fuse.allow_other {
                mount_opts.push(fuser::MountOption::AllowOther);
            }
            if config.fuse.auto_unmount {
                mount_opts.push(fuser::MountOption::AutoUnmount);
            }

            Ok(Self {
                _session: fuser::spawn_mount2(fuse_adapter, mount_point, &mount_opts)?,
            })
        }
    }

    pub struct ManagedFuse {
        mount_point: PathBuf,
    }

    impl ManagedFuse {
        pub fn new(config: &app_config::Config) -> Self {
            Self {
                mount_point: config.mount_point.clone(),
            }
        }

        /// Mounts `source` at the managed mount point. The returned scope keeps the session
        /// alive; drop it before `self` so the forced unmount runs last.
        pub fn spawn(
            &self,
            config: &app_config::Config,
            source: PathBuf,
            handle: tokio::runtime::Handle,
        ) -> Result<FuseCoreScope, std::io::Error> {
            FuseCoreScope::spawn(config, source, &self.mount_point, handle)
        }
    }

    impl Drop for ManagedFuse {
        fn drop(&mut self) {
            const UMOUNT_ATTEMPT_COUNT: usize = 10;
            const UMOUNT_ATTEMPT_DELAY: Duration = Duration::from_millis(10);

            debug!(mount_point = ?self.mount_point, "Confirming unmount of FUSE filesystem...");

            for attempt in 1..=UMOUNT_ATTEMPT_COUNT {
                let result = {
                    #[cfg(target_os = "macos")]
                    {
                        nix::mount::unmount(&self.mount_point, nix::mount::MntFlags::MNT_FORCE)
                    }

                    #[cfg(target_os = "linux")]
                    {
                        nix::mount::umount2(&self.mount_point, nix::mount::MntFlags::MNT_DETACH)
                    }
                };

                match result {
                    Ok(()) => {
                        debug!(attempt, "Unmounted FUSE filesystem.");
                        break;
                    }
                    Err(Errno::EBUSY) => {
                        debug!(attempt, "FUSE filesystem still busy, retrying...");
                        std::thread::sleep(UMOUNT_ATTEMPT_DELAY);
                    }
                    Err(Errno::EINVAL | Errno::ENOENT) => {
                        debug!(attempt, "FUSE filesystem already unmounted.");
                        break;
                    }
                    Err(e) => {
                        error!(attempt, error = %e, "Failed to unmount FUSE filesystem.");
                        break;
                    }
                }
            }
        }
    }
}

/// Prepares the mount point directory.
///
/// - If the directory exists and is non-empty, returns an error.
/// - If the directory does not exist, creates it (including parents) and logs an info message.
/// - If the directory exists and is empty, does nothing.
async fn prepare_mount_point(mount_point: &std::path::Path) -> Result<(), std::io::Error> {
    let mut entries = match tokio::fs::read_dir(mount_point).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(mount_point).await?;
            info!(path = %mount_point.display(), "Created mount point directory.");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    match entries.next_entry().await? {
        None => Ok(()),
        Some(_) => Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("Mount point '{}' is not empty.", mount_point.display()),
        )),
    }
}

/// Resolves once the process is asked to stop, naming the signal that did it.
async fn wait_for_exit() -> Result<&'static str, std::io::Error> {
    use tokio::signal::{self, unix::SignalKind};
    let mut sigterm = signal::unix::signal(SignalKind::terminate())?;
    let mut sighup = signal::unix::signal(SignalKind::hangup())?;
    let received = select! {
        _ = signal::ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sighup.recv() => "SIGHUP",
    };
    Ok(received)
}

/// Main entry point for the daemon.
pub async fn run(
    config: app_config::Config,
    handle: tokio::runtime::Handle,
) -> Result<(), std::io::Error> {
    let source = config.source.clone().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "No source directory configured.",
        )
    })?;
    let source = tokio::fs::canonicalize(&source).await?;

    prepare_mount_point(&config.mount_point).await?;

    info!(
        "Serving {} at {}.",
        source.display(),
        config.mount_point.display()
    );

    let fuse = managed_fuse::ManagedFuse::new(&config);
    {
        let _session = fuse.spawn(&config, source, handle)?;
        info!("path-fuse is running. Press Ctrl+C to stop.");

        let signal = wait_for_exit().await?;
        debug!(signal, "Shutting down...");
    }
    Ok(())
}

pub fn spawn(config: app_config::Config) -> Result<(), std::io::Error> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(config, runtime.handle().clone()))
}
