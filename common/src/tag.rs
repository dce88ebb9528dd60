/// Length of the marker that precedes the log path slot.
pub const MARKER_LEN: usize = 16;

/// The marker must appear exactly once in a built tracer image. The
/// trailing non-ASCII bytes keep it out of reach of ordinary strings.
pub const MARKER: [u8; MARKER_LEN] = *b"VIZZY-LOGPATH\0\xa5\x5a";

/// Room for a path, terminating '\0' included (Linux `PATH_MAX`).
pub const PATH_CAPACITY: usize = 4096;

/// The slot the launcher rewrites before deploying the tracer.
///
/// A `static` of this type lives in the tracer's `.data` section. Since the
/// marker is non-zero the whole record is backed by file bytes, which is
/// what makes patching the image on disk possible at all.
#[repr(C)]
pub struct TaggedPath {
    pub marker: [u8; MARKER_LEN],
    pub path:   [u8; PATH_CAPACITY],
}

impl TaggedPath {
    /// An unpatched slot: marker followed by an all-zero path.
    pub const fn blank() -> Self {
        Self {
            marker: MARKER,
            path:   [0; PATH_CAPACITY],
        }
    }
}

/// Returns the bytes of a NUL-terminated path field, terminator excluded.
/// A field without any terminator is returned whole.
pub fn path_field(field: &[u8]) -> &[u8] {
    let end = field.iter()
        .position(|b| *b == 0)
        .unwrap_or(field.len());

    &field[..end]
}
