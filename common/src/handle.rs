//! Shared ownership of opaque runtime handles

use std::fmt;
use std::ptr::NonNull;

/// Release function registered for a handle type
pub type Release<T> = unsafe extern "C" fn(*mut T);

/// An owned runtime handle paired with the function that frees it.
///
/// The release function runs exactly once, when the value is dropped. Share
/// an `Owned` through `Arc` to get reference-counted ownership; the last
/// owner releases the native object.
///
/// The release function lives in the runtime library, so every struct that
/// stores an `Owned` declares it before whatever keeps the library loaded.
pub struct Owned<T> {
    ptr: NonNull<T>,
    release: Release<T>,
    kind: &'static str,
}

impl<T> Owned<T> {
    /// Take ownership of `ptr`. Returns `None` for a null pointer.
    ///
    /// # Safety
    /// `ptr` must be a live handle that nothing else frees, and `release`
    /// must be the runtime's destructor for it.
    pub unsafe fn from_raw(ptr: *mut T, release: Release<T>, kind: &'static str) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr, release, kind })
    }

    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }
}

impl<T> Drop for Owned<T> {
    fn drop(&mut self) {
        // SAFETY: ptr came from the runtime with `release` as its destructor
        // and is released only here.
        unsafe { (self.release)(self.ptr.as_ptr()) };
        log::trace!("Released {}", self.kind);
    }
}

impl<T> fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:p}", self.kind, self.ptr)
    }
}

// SAFETY: Owned only frees the pointer. Each loader guards any mutation of
// the objects it wraps (a locked status object, or `&mut self` access).
unsafe impl<T> Send for Owned<T> {}
unsafe impl<T> Sync for Owned<T> {}
