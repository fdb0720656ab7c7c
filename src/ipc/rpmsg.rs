//! rpmsg character device endpoints.
//!
//! An endpoint is created by issuing `RPMSG_CREATE_EPT_IOCTL` on the rpmsg
//! control device with a unique name. The kernel then publishes a new
//! `/dev/rpmsgN` node whose sysfs `name` attribute carries that name; reads
//! and writes on it exchange messages with the remote endpoint address.

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rustix::fd::{AsRawFd, OwnedFd, RawFd};

use super::Transport;
use crate::error::{Error, Result};

/// RPMSG_CREATE_EPT_IOCTL: _IOW(0xb5, 0x1, struct rpmsg_endpoint_info)
const RPMSG_CREATE_EPT_IOCTL: libc::c_ulong = 0x4028_b501;

/// RPMSG_DESTROY_EPT_IOCTL: _IO(0xb5, 0x2)
const RPMSG_DESTROY_EPT_IOCTL: libc::c_ulong = 0xb502;

/// Let the kernel pick the local address.
const RPMSG_ADDR_ANY: u32 = 0xffff_ffff;

const RPMSG_NAME_SIZE: usize = 32;

const SYSFS_RPMSG: &str = "/sys/class/rpmsg";

/// How long to wait for the endpoint node to appear.
const DEVICE_WAIT: Duration = Duration::from_millis(500);
const DEVICE_POLL: Duration = Duration::from_millis(10);

/// struct rpmsg_endpoint_info
#[repr(C)]
struct RpmsgEndpointInfo {
    name: [libc::c_char; RPMSG_NAME_SIZE],
    src: u32,
    dst: u32,
}

/// Endpoint name for a processor and the current process.
///
/// Names are unique per process so several daemons can talk to the same core.
pub fn endpoint_name(proc_id: u32, pid: u32) -> String {
    format!("rpmsg-char-{}-{}", proc_id, pid)
}

/// An open rpmsg endpoint device.
#[derive(Debug)]
pub struct RpmsgEndpoint {
    fd: OwnedFd,
    name: String,
    device: PathBuf,
}

impl RpmsgEndpoint {
    /// Create and open an endpoint bound to `remote_endpoint` on `proc_id`.
    pub fn open(ctrl_device: &Path, proc_id: u32, remote_endpoint: u32) -> Result<Self> {
        Self::open_with_sysfs(ctrl_device, Path::new(SYSFS_RPMSG), proc_id, remote_endpoint)
    }

    /// As [`open`](Self::open), resolving endpoint nodes under `sysfs_root`.
    pub fn open_with_sysfs(
        ctrl_device: &Path,
        sysfs_root: &Path,
        proc_id: u32,
        remote_endpoint: u32,
    ) -> Result<Self> {
        let name = endpoint_name(proc_id, std::process::id());

        let ctrl = OpenOptions::new()
            .read(true)
            .write(true)
            .open(ctrl_device)
            .map_err(|e| {
                Error::ChannelOpen(format!("cannot open {}: {}", ctrl_device.display(), e))
            })?;

        let mut info = RpmsgEndpointInfo {
            name: [0; RPMSG_NAME_SIZE],
            src: RPMSG_ADDR_ANY,
            dst: remote_endpoint,
        };
        for (dst, src) in info.name.iter_mut().zip(name.bytes().take(RPMSG_NAME_SIZE - 1)) {
            *dst = src as libc::c_char;
        }

        // SAFETY: ctrl is an open rpmsg control device and `info` matches
        // struct rpmsg_endpoint_info.
        let ret = unsafe { libc::ioctl(ctrl.as_raw_fd(), RPMSG_CREATE_EPT_IOCTL as _, &info) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            return Err(Error::ChannelOpen(format!(
                "RPMSG_CREATE_EPT_IOCTL for {} failed: {}",
                name, err
            )));
        }

        let device = match wait_for_endpoint(sysfs_root, &name) {
            Ok(device) => device,
            Err(e) => {
                // destroy needs the endpoint node, which never showed up
                tracing::error!(endpoint = %name, "rpmsg endpoint created but not reachable");
                return Err(e);
            }
        };
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(&device)
        {
            Ok(file) => file,
            Err(e) => {
                release_endpoint(&device, &name);
                return Err(Error::ChannelOpen(format!(
                    "cannot open {}: {}",
                    device.display(),
                    e
                )));
            }
        };

        tracing::info!(
            endpoint = %name,
            device = %device.display(),
            proc_id,
            remote_endpoint,
            "created rpmsg endpoint"
        );

        Ok(Self {
            fd: file.into(),
            name,
            device,
        })
    }

    /// Endpoint name registered with the kernel.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the endpoint device node.
    pub fn device(&self) -> &Path {
        &self.device
    }
}

/// Destroy an endpoint whose node could not be opened for I/O.
///
/// Any open descriptor accepts the destroy ioctl, so a read-only open is
/// tried. Returns whether the endpoint was destroyed.
fn release_endpoint(device: &Path, name: &str) -> bool {
    match OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_CLOEXEC)
        .open(device)
    {
        Ok(file) => destroy_endpoint(file.as_raw_fd(), name),
        Err(e) => {
            tracing::error!(
                endpoint = %name,
                device = %device.display(),
                error = %e,
                "cannot release rpmsg endpoint"
            );
            false
        }
    }
}

fn destroy_endpoint(fd: RawFd, name: &str) -> bool {
    // SAFETY: fd is open for the duration of the call; the ioctl takes no
    // argument.
    let ret = unsafe { libc::ioctl(fd, RPMSG_DESTROY_EPT_IOCTL as _) };
    if ret < 0 {
        tracing::warn!(
            endpoint = %name,
            error = %std::io::Error::last_os_error(),
            "failed to destroy rpmsg endpoint"
        );
        return false;
    }
    true
}

fn wait_for_endpoint(sysfs_root: &Path, name: &str) -> Result<PathBuf> {
    let deadline = std::time::Instant::now() + DEVICE_WAIT;
    loop {
        if let Some(path) = find_endpoint_device(sysfs_root, name)? {
            return Ok(path);
        }
        if std::time::Instant::now() >= deadline {
            return Err(Error::ChannelOpen(format!(
                "endpoint device for {} did not appear",
                name
            )));
        }
        std::thread::sleep(DEVICE_POLL);
    }
}

/// Look up the `/dev` node of an endpoint by its sysfs name attribute.
pub(crate) fn find_endpoint_device(sysfs_root: &Path, name: &str) -> Result<Option<PathBuf>> {
    let entries = match std::fs::read_dir(sysfs_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::ChannelOpen(format!("cannot scan {}: {}", sysfs_root.display(), e))),
    };

    for entry in entries.flatten() {
        let node = entry.file_name();
        let Some(node) = node.to_str() else { continue };
        if !node.starts_with("rpmsg") || node.starts_with("rpmsg_ctrl") {
            continue;
        }
        let Ok(attr) = std::fs::read_to_string(entry.path().join("name")) else {
            continue;
        };
        if attr.trim_end() == name {
            return Ok(Some(Path::new("/dev").join(node)));
        }
    }
    Ok(None)
}

impl Transport for RpmsgEndpoint {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        rustix::io::write(&self.fd, buf).map_err(std::io::Error::from)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> std::io::Result<Option<usize>> {
        let timeout_ms = match timeout {
            Some(t) => t.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };
        let mut pfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        loop {
            // SAFETY: pfd points to one valid pollfd for the duration of the call.
            let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if ret < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if ret == 0 {
                return Ok(None);
            }
            break;
        }

        let n = rustix::io::read(&self.fd, buf).map_err(std::io::Error::from)?;
        Ok(Some(n))
    }
}

impl Drop for RpmsgEndpoint {
    fn drop(&mut self) {
        destroy_endpoint(self.fd.as_raw_fd(), &self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_name_format() {
        assert_eq!(endpoint_name(8, 4242), "rpmsg-char-8-4242");
    }

    #[test]
    fn test_endpoint_info_layout() {
        assert_eq!(std::mem::size_of::<RpmsgEndpointInfo>(), 40);
        assert_eq!((RPMSG_CREATE_EPT_IOCTL >> 16) & 0x3fff, 40);
    }

    #[test]
    fn test_find_endpoint_device() {
        let root = tempfile::tempdir().unwrap();
        for (node, name) in [
            ("rpmsg_ctrl0", "rpmsg-char-8-1"),
            ("rpmsg0", "ti.ipc4.ping-pong"),
            ("rpmsg3", "rpmsg-char-8-1"),
        ] {
            let dir = root.path().join(node);
            std::fs::create_dir(&dir).unwrap();
            std::fs::write(dir.join("name"), format!("{}\n", name)).unwrap();
        }

        let found = find_endpoint_device(root.path(), "rpmsg-char-8-1").unwrap();
        assert_eq!(found, Some(PathBuf::from("/dev/rpmsg3")));
        assert_eq!(find_endpoint_device(root.path(), "rpmsg-char-9-1").unwrap(), None);
    }

    #[test]
    fn test_release_reopens_node_for_destroy() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("rpmsg7");
        assert!(!release_endpoint(&missing, "rpmsg-char-8-1"));

        // a regular file opens but rejects the ioctl
        let node = dir.path().join("rpmsg3");
        std::fs::write(&node, b"").unwrap();
        let mut perms = std::fs::metadata(&node).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o444);
        std::fs::set_permissions(&node, perms).unwrap();
        assert!(!release_endpoint(&node, "rpmsg-char-8-1"));
    }

    #[test]
    fn test_open_missing_ctrl_device() {
        let err = RpmsgEndpoint::open(Path::new("/nonexistent/rpmsg_ctrl0"), 8, 14).unwrap_err();
        assert!(matches!(err, Error::ChannelOpen(_)));
    }
}
