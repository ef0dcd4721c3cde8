// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Crash-safe publication of a finished artifact.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use filetime::FileTime;
use tracing::debug;

use crate::error::{Error, Result};

fn sibling_temp(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp_publish");
    PathBuf::from(name)
}

/// Moves `temp` to `dest`. An atomic rename is attempted first; when it
/// fails (typically because the two paths sit on different filesystems) the
/// bytes are copied to a sibling of `dest` and renamed into place, so a
/// partial copy is never observable at `dest`.
pub fn publish(temp: &Path, dest: &Path) -> Result<()> {
    match fs::rename(temp, dest) {
        Ok(()) => return Ok(()),
        Err(err) => {
            debug!(%err, "rename failed, falling back to copy");
        }
    }

    let staging = sibling_temp(dest);
    fs::copy(temp, &staging).map_err(|e| Error::Publish(dest.to_path_buf(), e))?;
    if let Err(err) = fs::rename(&staging, dest) {
        let _ = fs::remove_file(&staging);
        return Err(Error::Publish(dest.to_path_buf(), err));
    }
    fs::remove_file(temp).map_err(|e| Error::Publish(dest.to_path_buf(), e))?;
    Ok(())
}

/// Restores the source file's modification time and permission bits on the
/// published path; the encode pipeline does not preserve either.
pub fn restore_attributes(
    path: &Path,
    mtime: SystemTime,
    permissions: fs::Permissions,
) -> std::io::Result<()> {
    fs::set_permissions(path, permissions)?;
    filetime::set_file_mtime(path, FileTime::from_system_time(mtime))
}
