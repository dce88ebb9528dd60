use crate::patch::patch;
use crate::utils::PatchError;
use std::path::Path;

static TRACER: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/libvizzy.so"));

/// An immutable tracer image. Only patched copies ever leave it.
#[derive(Copy, Clone, Debug)]
pub struct EmbeddedImage {
    bytes: &'static [u8],
}

impl EmbeddedImage {
    /// The tracer library built alongside this binary.
    pub fn tracer() -> Self {
        Self { bytes: TRACER }
    }

    /// Wraps some other image, e.g. a hand-made one in tests.
    pub fn from_static(bytes: &'static [u8]) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &'static [u8] {
        self.bytes
    }

    /// A fresh copy of the image with `log_path` written into its slot.
    pub fn patched(&self, log_path: &Path) -> Result<Vec<u8>, PatchError> {
        patch(self.bytes, log_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::read_tagged_path;

    #[test]
    fn bundled_tracer_is_an_elf_object() {
        let image = EmbeddedImage::tracer();
        assert!(image.bytes().len() > 4);
        assert_eq!(&image.bytes()[..4], b"\x7fELF");
    }

    #[test]
    fn bundled_tracer_carries_an_unpatched_slot() {
        assert_eq!(read_tagged_path(EmbeddedImage::tracer().bytes()), Ok(&b""[..]));
    }

    #[test]
    fn patching_leaves_the_bundle_alone() {
        let image = EmbeddedImage::tracer();
        let patched = image.patched(Path::new("/tmp/trace.csv")).unwrap();
        assert_eq!(read_tagged_path(&patched), Ok(&b"/tmp/trace.csv"[..]));
        assert_eq!(read_tagged_path(image.bytes()), Ok(&b""[..]));
        assert_eq!(patched.len(), image.bytes().len());
    }
}
