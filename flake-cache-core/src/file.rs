use crate::error::CacheResult;
use blake3::Hasher;
use std::fs::File;
use std::io;
use std::path::Path;

/// Compute a hash of a file's contents
pub fn compute_file_hash<P: AsRef<Path>>(path: P) -> CacheResult<String> {
    let mut file = File::open(path.as_ref())?;
    let mut hasher = Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Compute a hash of a string
pub fn compute_string_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

/// Combined hash of the contents of a set of files.
///
/// Missing files contribute a marker rather than failing, so a file appearing
/// or disappearing changes the fingerprint. Returns `None` when none of the files exist.
pub fn fingerprint_files<P: AsRef<Path>>(paths: &[P]) -> CacheResult<Option<String>> {
    let mut hasher = Hasher::new();
    let mut found = false;

    for path in paths {
        let path = path.as_ref();
        hasher.update(path.as_os_str().as_encoded_bytes());
        match compute_file_hash(path) {
            Ok(hash) => {
                found = true;
                hasher.update(b"\0hash\0");
                hasher.update(hash.as_bytes());
            }
            Err(crate::CacheError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                hasher.update(b"\0missing\0");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(found.then(|| hasher.finalize().to_hex().to_string()))
}
