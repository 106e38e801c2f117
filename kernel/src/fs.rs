// fs.rs
//
// The filesystem is an external collaborator: `readpg` needs bytes
// for a demand-fill page, and the real source of those bytes (an
// inode cache, a block device, an initrd image) is out of scope here.
// This module is a minimal stand-in with just enough behavior —
// including short reads past end-of-file — to exercise `readpg`
// honestly.

use spin::Mutex;

/// Toy inode table: each inode is a fixed-capacity byte buffer sliced
/// out of a single static backing store. Good enough to model an
/// initrd-style read-only image; nowhere near a real filesystem.
const MAX_INODES: usize = 16;
const INODE_CAPACITY: usize = 64 * 1024;

struct Inode {
    data: [u8; INODE_CAPACITY],
    len: usize,
}

impl Inode {
    const fn empty() -> Self {
        Self {
            data: [0; INODE_CAPACITY],
            len: 0,
        }
    }
}

static INODES: Mutex<[Inode; MAX_INODES]> =
    Mutex::new([const { Inode::empty() }; MAX_INODES]);

/// Install the contents of inode `n` (used by boot-time initrd setup
/// and by tests). Truncates to `INODE_CAPACITY`.
pub fn install(n: u32, bytes: &[u8]) {
    let idx = n as usize;
    if idx >= MAX_INODES {
        return;
    }
    let mut table = INODES.lock();
    let len = bytes.len().min(INODE_CAPACITY);
    table[idx].data[..len].copy_from_slice(&bytes[..len]);
    table[idx].len = len;
}

/// Read up to `len` bytes from inode `inode` at byte offset `off`
/// into `buf` (which must be at least `len` bytes).
///
/// Returns the number of bytes actually read, which is less than
/// `len` at end-of-file (a "short read") — never an error by itself.
/// Returns a negative count only for a genuinely invalid inode.
pub fn file_read(inode: u32, buf: *mut u8, len: usize, off: u64) -> isize {
    let idx = inode as usize;
    if idx >= MAX_INODES {
        return -1;
    }

    let table = INODES.lock();
    let file = &table[idx];
    let off = off as usize;

    if off >= file.len {
        return 0;
    }

    let available = file.len - off;
    let to_copy = available.min(len);

    unsafe {
        core::ptr::copy_nonoverlapping(file.data[off..].as_ptr(), buf, to_copy);
    }

    to_copy as isize
}
