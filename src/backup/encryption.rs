//! Delegates file encryption to an external executable.

use super::ExtensionSet;
use crate::error::{BackupError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_EXECUTABLE: &str = "CryptoSoft";

#[derive(Debug, Clone)]
pub struct EncryptionService {
    executable: PathBuf,
}

impl Default for EncryptionService {
    fn default() -> Self {
        Self::new(DEFAULT_EXECUTABLE)
    }
}

impl EncryptionService {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn should_encrypt(path: &Path, extensions: &ExtensionSet) -> bool {
        extensions.matches(path)
    }

    /// Runs `<executable> <path> <key>` and waits for it. Returns the elapsed
    /// time in milliseconds.
    pub fn encrypt_file(&self, path: &Path, key: &str) -> Result<u64> {
        if key.is_empty() {
            return Err(BackupError::EncryptionKeyMissing);
        }

        debug!("Encrypting {} with {}", path.display(), self.executable.display());
        let start = Instant::now();
        let output = Command::new(&self.executable)
            .arg(path)
            .arg(key)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    BackupError::EncryptionToolMissing(self.executable.clone())
                }
                _ => BackupError::Io(e),
            })?;
        let elapsed = start.elapsed().as_millis() as u64;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(
                "Encryption of {} failed with {:?}: {}",
                path.display(),
                output.status.code(),
                stderr
            );
            return Err(BackupError::EncryptionFailed {
                code: output.status.code(),
                stderr,
            });
        }

        debug!("Encrypted {} in {}", path.display(), humantime::format_duration(start.elapsed()));
        Ok(elapsed)
    }
}

#[cfg(all(test, unix))]
pub(crate) mod test_support {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Writes an executable script that appends each invocation to `calls.log`
    /// next to it and exits with `exit_code`.
    pub fn fake_tool(dir: &Path, exit_code: i32) -> PathBuf {
        let script = dir.join("fake-crypto.sh");
        let log = dir.join("calls.log");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$1 $2\" >> '{}'\necho 'bad key' >&2\nexit {}\n",
                log.display(),
                exit_code
            ),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    pub fn calls(dir: &Path) -> Vec<String> {
        fs::read_to_string(dir.join("calls.log"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}
