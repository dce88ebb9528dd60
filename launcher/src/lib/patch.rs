use crate::utils::PatchError;
use memchr::memmem;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use vizzy_common::{path_field, MARKER, MARKER_LEN, PATH_CAPACITY};

/// Offset of the path slot, that is the byte right after the one and
/// only marker in `image`.
pub fn locate_slot(image: &[u8]) -> Result<usize, PatchError> {
    let mut hits = memmem::find_iter(image, &MARKER);
    let first = hits.next().ok_or(PatchError::MarkerMissing)?;
    let others = hits.count();
    if others > 0 {
        return Err(PatchError::MarkerRepeated(others + 1));
    }
    let slot = first + MARKER_LEN;
    if image.len() < slot + PATH_CAPACITY {
        return Err(PatchError::SlotTruncated);
    }

    Ok(slot)
}

/// The path currently stored in `image`'s slot. Empty if unpatched.
pub fn read_tagged_path(image: &[u8]) -> Result<&[u8], PatchError> {
    let slot = locate_slot(image)?;
    Ok(path_field(&image[slot..slot + PATH_CAPACITY]))
}

pub fn patch(template: &[u8], log_path: &Path) -> Result<Vec<u8>, PatchError> {
    //! Returns a copy of `template` whose slot holds `log_path`,
    //! NUL-terminated and zero-padded. The template is never touched;
    //! any failure leaves the caller with nothing to deploy.
    let path = log_path.as_os_str().as_bytes();
    if path.is_empty() {
        return Err(PatchError::EmptyPath);
    }
    if path.contains(&0) {
        return Err(PatchError::InteriorNul);
    }
    // One byte of the slot is reserved for the terminator.
    if path.len() >= PATH_CAPACITY {
        return Err(PatchError::PathTooLong { len: path.len(), capacity: PATH_CAPACITY - 1 });
    }
    let slot = locate_slot(template)?;

    let mut image = template.to_vec();
    let field = &mut image[slot..slot + PATH_CAPACITY];
    field.fill(0);
    field[..path.len()].copy_from_slice(path);

    // Round trip: whatever the tracer will find is what we meant.
    if read_tagged_path(&image)? != path {
        return Err(PatchError::Verification);
    }

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> Vec<u8> {
        let mut image = b"\x7fELF-prologue".to_vec();
        image.extend_from_slice(&MARKER);
        image.extend_from_slice(&[0; PATH_CAPACITY]);
        image.extend_from_slice(b"epilogue");
        image
    }

    #[test]
    fn embeds_path_right_after_marker() {
        let template = template();
        let image = patch(&template, Path::new("/tmp/trace.csv")).unwrap();
        let slot = locate_slot(&image).unwrap();
        assert_eq!(&image[slot - MARKER_LEN..slot], &MARKER);
        assert_eq!(&image[slot..slot + 15], b"/tmp/trace.csv\0");
        assert!(image[slot + 15..slot + PATH_CAPACITY].iter().all(|b| *b == 0));
        assert_eq!(read_tagged_path(&image), Ok(&b"/tmp/trace.csv"[..]));
        assert_eq!(image.len(), template.len());
        assert!(image.ends_with(b"epilogue"));
    }

    #[test]
    fn repatching_clears_a_longer_previous_path() {
        let first = patch(&template(), Path::new("/var/tmp/a/much/longer/path.csv")).unwrap();
        let second = patch(&first, Path::new("/tmp/t")).unwrap();
        assert_eq!(read_tagged_path(&second), Ok(&b"/tmp/t"[..]));
    }

    #[test]
    fn template_is_left_untouched() {
        let template = template();
        let pristine = template.clone();
        patch(&template, Path::new("/tmp/trace.csv")).unwrap();
        assert_eq!(template, pristine);
    }

    #[test]
    fn longest_path_that_fits() {
        let path = format!("/{}", "p".repeat(PATH_CAPACITY - 2));
        let image = patch(&template(), Path::new(&path)).unwrap();
        assert_eq!(read_tagged_path(&image).unwrap(), path.as_bytes());
    }

    #[test]
    fn path_too_long_is_rejected() {
        let path = format!("/{}", "p".repeat(PATH_CAPACITY - 1));
        assert_eq!(
            patch(&template(), Path::new(&path)),
            Err(PatchError::PathTooLong { len: PATH_CAPACITY, capacity: PATH_CAPACITY - 1 })
        );
    }

    #[test]
    fn unusable_paths_are_rejected() {
        assert_eq!(patch(&template(), Path::new("")), Err(PatchError::EmptyPath));
        let nul = std::ffi::OsStr::from_bytes(b"/tmp/a\0b");
        assert_eq!(patch(&template(), Path::new(nul)), Err(PatchError::InteriorNul));
    }

    #[test]
    fn missing_marker() {
        assert_eq!(patch(b"no marker in here", Path::new("/tmp/x")), Err(PatchError::MarkerMissing));
    }

    #[test]
    fn repeated_marker() {
        let mut image = template();
        image.extend_from_slice(&template());
        assert_eq!(patch(&image, Path::new("/tmp/x")), Err(PatchError::MarkerRepeated(2)));
    }

    #[test]
    fn truncated_slot() {
        let mut image = b"head".to_vec();
        image.extend_from_slice(&MARKER);
        image.extend_from_slice(&[0; 8]);
        assert_eq!(read_tagged_path(&image), Err(PatchError::SlotTruncated));
    }
}
