//! Scoped activation of pixel data codec support.
//!
//! DICOM-rs registers its transfer syntaxes statically, so there is nothing to
//! install at runtime. What still has to hold is that a normalization runs with
//! codec support active for exactly its own duration and that two of them never
//! interleave. [`CodecScope`] is that guard: acquiring it waits for any other
//! normalization to finish, and dropping it releases the slot again.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use dicom::encoding::TransferSyntaxIndex;
use dicom::transfer_syntax::TransferSyntaxRegistry;
use log::debug;

static NORMALIZATION_LOCK: Mutex<()> = Mutex::new(());
static ACTIVE_SCOPES: AtomicUsize = AtomicUsize::new(0);

/// Number of codec scopes currently alive in this process.
///
/// Always 0 or 1, since scopes are serialized.
pub fn active_scopes() -> usize {
    ACTIVE_SCOPES.load(Ordering::SeqCst)
}

/// Codec support for the duration of one normalization.
#[derive(Debug)]
pub struct CodecScope {
    _lock: MutexGuard<'static, ()>,
}

impl CodecScope {
    /// Enable codec support, blocking while another scope is alive.
    ///
    /// Not reentrant: normalizing on a thread that already holds a scope
    /// would wait forever, so scopes are only taken by the normalizer itself.
    pub(crate) fn acquire() -> Self {
        // a panic inside a previous normalization must not disable decoding
        // for the rest of the process
        let lock = NORMALIZATION_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let active = ACTIVE_SCOPES.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Codec support enabled ({} active)", active);
        CodecScope { _lock: lock }
    }

    /// Whether the given transfer syntax is known
    /// and both its data set and pixel data can be decoded.
    pub fn supports_decoding(&self, uid: &str) -> bool {
        let uid = uid.trim_end_matches(|c: char| c == '\0' || c.is_whitespace());
        TransferSyntaxRegistry
            .get(uid)
            .map(|ts| ts.can_decode_all())
            .unwrap_or(false)
    }
}

impl Drop for CodecScope {
    fn drop(&mut self) {
        let remaining = ACTIVE_SCOPES.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!("Codec support released ({} active)", remaining);
    }
}
