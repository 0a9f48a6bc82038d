//! Whole-file sealing and the secure write helpers shared with the stores
//!
//! Every file written here is created with mode 0o600 on Unix systems.

use crate::engine::{self, Opened};
use crate::error::{ErrorCategory, ErrorKind, Result, VaultError};
use crate::password::Password;
use crate::secretcrypt::KdfParams;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::debug;
use zeroize::Zeroizing;

/// Seal the text in `input_path` and write the armored blob to `output_path`.
pub fn seal_file(
    input_path: &Path,
    output_path: &Path,
    password: &Password,
    kdf: &KdfParams,
) -> Result<()> {
    let plaintext = read_text(input_path)?;
    let blob = engine::seal_with_params(&plaintext, password, kdf)?;
    write_file_secure(output_path, blob.as_bytes())
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;
    debug!(path = %output_path.display(), "sealed file");
    Ok(())
}

/// Open the blob in `input_path` and write the plaintext to `output_path`.
///
/// A blob that does not open yields the generic wrong-password error and
/// leaves `output_path` untouched.
pub fn open_file(
    input_path: &Path,
    output_path: &Path,
    password: &Password,
    rejection_cost: &KdfParams,
) -> Result<()> {
    let blob = read_text(input_path)?;
    let plaintext = open_or_wrong_key(&blob, password, rejection_cost)?;
    write_file_secure(output_path, plaintext.as_bytes())
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;
    Ok(())
}

/// Replace the blob in `crypt_path` with the text of `plain_path`, sealed
/// under the same password.
///
/// The existing blob must open with `password` first, so an update can never
/// silently change the password. The replacement is written atomically.
pub fn reseal_file(
    plain_path: &Path,
    crypt_path: &Path,
    password: &Password,
    kdf: &KdfParams,
) -> Result<()> {
    let blob = read_text(crypt_path)?;
    open_or_wrong_key(&blob, password, kdf)?;

    let new_plaintext = read_text(plain_path)?;
    let new_blob = engine::seal_with_params(&new_plaintext, password, kdf)?;
    write_atomic(crypt_path, new_blob.as_bytes())
}

fn open_or_wrong_key(
    blob: &str,
    password: &Password,
    rejection_cost: &KdfParams,
) -> Result<Zeroizing<String>> {
    match engine::open_with_params(blob.trim_end(), password, rejection_cost)? {
        Opened::Plaintext(text) => Ok(text),
        Opened::WrongKey => Err(VaultError::wrong_key()),
    }
}

/// Read a UTF-8 text file into a zeroizing buffer.
pub fn read_text(path: &Path) -> Result<Zeroizing<String>> {
    let bytes = Zeroizing::new(fs::read(path).map_err(|e| read_error(path, e))?);
    let text = std::str::from_utf8(&bytes).map_err(|e| {
        VaultError::with_kind_and_source(
            ErrorCategory::InvalidInput,
            ErrorKind::Io,
            format!("{} is not valid UTF-8", path.display()),
            e,
        )
    })?;
    Ok(Zeroizing::new(text.to_owned()))
}

/// Atomically replace `path` with `contents` (tempfile + fsync + rename).
///
/// Either the old file or the new one exists afterwards, never a partial one.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        Some(_) => Path::new("."),
        None => {
            return Err(VaultError::persistence(
                ErrorKind::Io,
                format!("{} has no parent directory", path.display()),
            ));
        }
    };
    let mut temp_file = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| io_fault("failed to create tempfile", e))?;

    temp_file
        .write_all(contents)
        .map_err(|e| io_fault("failed to write to tempfile", e))?;
    // Flush and fsync() such that the rename later, if it succeeds, will
    // always point to a valid file.
    temp_file
        .flush()
        .map_err(|e| io_fault("failed to flush tempfile", e))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| io_fault("failed to sync file prior to rename", e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = temp_file
            .as_file()
            .metadata()
            .map_err(|e| io_fault("failed to get tempfile metadata", e))?
            .permissions();
        perms.set_mode(0o600);
        temp_file
            .as_file()
            .set_permissions(perms)
            .map_err(|e| io_fault("failed to set tempfile permissions", e))?;
    }
    temp_file.persist(path).map_err(|e| {
        VaultError::with_kind_and_source(
            ErrorCategory::PersistenceFault,
            ErrorKind::Io,
            format!("failed to rename to target file {}", path.display()),
            e,
        )
    })?;
    Ok(())
}

/// Write file with secure permissions (0o600 on Unix)
pub fn write_file_secure(path: &Path, contents: &[u8]) -> Result<()> {
    #[cfg(unix)]
    {
        use std::fs::OpenOptions;
        use std::os::unix::fs::OpenOptionsExt;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| io_fault(format!("failed to open {}", path.display()), e))?;

        file.write_all(contents)
            .map_err(|e| io_fault(format!("failed to write {}", path.display()), e))?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        fs::write(path, contents)
            .map_err(|e| io_fault(format!("failed to write {}", path.display()), e))?;
        Ok(())
    }
}

pub(crate) fn read_error(path: &Path, err: io::Error) -> VaultError {
    let category = if err.kind() == io::ErrorKind::NotFound {
        ErrorCategory::InvalidInput
    } else {
        ErrorCategory::PersistenceFault
    };
    VaultError::with_kind_and_source(
        category,
        ErrorKind::Io,
        format!("failed to read from {}", path.display()),
        err,
    )
}

fn io_fault(msg: impl Into<String>, err: io::Error) -> VaultError {
    VaultError::with_kind_and_source(ErrorCategory::PersistenceFault, ErrorKind::Io, msg, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    fn fast() -> KdfParams {
        KdfParams::new(4, 8, 1).unwrap()
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let crypt_path = temp_dir.path().join("plain.txt.snipvault");
        let opened_path = temp_dir.path().join("opened.txt");

        fs::write(&plain_path, "Hello, snipvault!").unwrap();

        let password = Password::from("test password");
        seal_file(&plain_path, &crypt_path, &password, &fast()).unwrap();
        assert!(fs::read_to_string(&crypt_path).unwrap().starts_with("snipvault1:"));

        open_file(&crypt_path, &opened_path, &password, &fast()).unwrap();
        assert_eq!(fs::read_to_string(&opened_path).unwrap(), "Hello, snipvault!");
    }

    #[test]
    fn test_reseal_file() {
        let temp_dir = TempDir::new().unwrap();
        let plain1_path = temp_dir.path().join("plain1.txt");
        let plain2_path = temp_dir.path().join("plain2.txt");
        let crypt_path = temp_dir.path().join("crypt.snipvault");
        let password = Password::from("test password");

        fs::write(&plain1_path, "Initial content").unwrap();
        seal_file(&plain1_path, &crypt_path, &password, &fast()).unwrap();

        fs::write(&plain2_path, "Updated content").unwrap();
        reseal_file(&plain2_path, &crypt_path, &password, &fast()).unwrap();

        let opened_path = temp_dir.path().join("opened.txt");
        open_file(&crypt_path, &opened_path, &password, &fast()).unwrap();
        assert_eq!(fs::read_to_string(&opened_path).unwrap(), "Updated content");
    }

    #[test]
    fn test_reseal_with_wrong_password_leaves_blob() {
        let temp_dir = TempDir::new().unwrap();
        let plain1_path = temp_dir.path().join("plain1.txt");
        let plain2_path = temp_dir.path().join("plain2.txt");
        let crypt_path = temp_dir.path().join("crypt.snipvault");

        fs::write(&plain1_path, "Initial").unwrap();
        seal_file(&plain1_path, &crypt_path, &Password::from("correct"), &fast()).unwrap();
        let before = fs::read(&crypt_path).unwrap();

        fs::write(&plain2_path, "Updated").unwrap();
        let err = reseal_file(&plain2_path, &crypt_path, &Password::from("wrong"), &fast())
            .expect_err("expected wrong password");
        assert!(err.is_wrong_key());
        assert_eq!(fs::read(&crypt_path).unwrap(), before);
    }

    #[test]
    fn test_open_wrong_password_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let crypt_path = temp_dir.path().join("crypt.snipvault");
        let opened_path = temp_dir.path().join("opened.txt");

        fs::write(&plain_path, "secret").unwrap();
        seal_file(&plain_path, &crypt_path, &Password::from("correct"), &fast()).unwrap();

        let err = open_file(&crypt_path, &opened_path, &Password::from("wrong"), &fast())
            .expect_err("expected wrong password");
        assert_eq!(err.category, ErrorCategory::WrongKey);
        assert!(!opened_path.exists());
    }

    #[test]
    fn test_missing_input_is_invalid_input() {
        let temp_dir = TempDir::new().unwrap();
        let err = seal_file(
            &temp_dir.path().join("missing.txt"),
            &temp_dir.path().join("out"),
            &Password::from("k"),
            &fast(),
        )
        .expect_err("expected read failure");
        assert_eq!(err.category, ErrorCategory::InvalidInput);
        assert_eq!(err.kind, Some(ErrorKind::Io));
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("doc.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");

        let leftovers = fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    #[cfg(unix)]
    fn test_file_permissions() {
        let temp_dir = TempDir::new().unwrap();
        let plain_path = temp_dir.path().join("plain.txt");
        let crypt_path = temp_dir.path().join("crypt.snipvault");

        fs::write(&plain_path, "test").unwrap();
        seal_file(&plain_path, &crypt_path, &Password::from("test"), &fast()).unwrap();

        let permissions = fs::metadata(&crypt_path).unwrap().permissions();
        assert_eq!(permissions.mode() & 0o777, 0o600);
    }
}
