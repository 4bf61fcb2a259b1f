// Static binary assets used by the file-streaming scenarios. Read-only;
// lengths and digests are pinned so responses can be checked byte-for-byte.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};

/// One pinned binary asset.
pub struct Fixture {
    pub file_name: &'static str,
    pub content_type: &'static str,
    pub byte_len: u64,
    pub sha1_hex: &'static str,
}

pub const SMALL_IMAGE: Fixture = Fixture {
    file_name: "badge.png",
    content_type: "image/png",
    byte_len: 3472,
    sha1_hex: "93582406bbd3837b448bf10f00765b3b5993c252",
};

pub const LARGE_IMAGE: Fixture = Fixture {
    file_name: "skyline.jpg",
    content_type: "image/jpeg",
    byte_len: 1_048_576,
    sha1_hex: "2511e9beb5c716c433ebac65432b7907440b7354",
};

impl Fixture {
    #[must_use]
    pub fn path(&self) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("fixtures")
            .join(self.file_name)
    }

    pub fn open(&self) -> io::Result<File> {
        File::open(self.path())
    }
}

/// Lowercase hex SHA-1 digest of `data`.
#[must_use]
pub fn sha1_hex(data: &[u8]) -> String {
    let digest = Sha1::digest(data);
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}
