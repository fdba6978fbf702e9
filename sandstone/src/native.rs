//! Binding to the platform compiler in `libsandbox.dylib`.
//!
//! `sandbox_compile_string` returns a heap-allocated `struct sandbox_profile`
//! owned by the caller until `sandbox_free_profile`. [`NativeProfile`] owns
//! that pointer and frees it exactly once on drop.

use std::ffi::{CStr, CString, c_char, c_uint, c_void};
use std::fmt;
use std::ptr::{self, NonNull};

use tracing::{Level, debug, instrument};

use crate::compile::{CompileError, CompiledProfile, Compiler};
use crate::sbpl::Parameters;

/// Mirror of `struct sandbox_profile`.
#[repr(C)]
#[derive(Debug)]
pub struct SandboxProfile {
    pub kind: c_uint,
    pub bytecode: *mut c_void,
    pub bytecode_length: libc::size_t,
}

#[link(name = "sandbox")]
unsafe extern "C" {
    fn sandbox_compile_string(
        profile_sbpl: *const c_char,
        parameters: *mut c_void,
        error: *mut *mut c_char,
    ) -> *mut SandboxProfile;

    fn sandbox_free_profile(profile: *mut SandboxProfile);
}

/// A profile compiled by libsandbox.
pub struct NativeProfile {
    raw: NonNull<SandboxProfile>,
}

// The profile is plain heap memory with no thread affinity.
unsafe impl Send for NativeProfile {}

impl NativeProfile {
    /// Compile `source` with libsandbox.
    #[instrument(level = Level::TRACE, skip(source))]
    pub fn compile(source: &str) -> Result<Self, CompileError> {
        let source = CString::new(source).map_err(|_| CompileError::Native {
            message: "profile source contains a NUL byte".into(),
        })?;

        let mut error: *mut c_char = ptr::null_mut();
        // SAFETY: `source` is NUL-terminated and outlives the call; `error` is a
        // valid out-pointer; a null parameter list is accepted.
        let raw = unsafe { sandbox_compile_string(source.as_ptr(), ptr::null_mut(), &mut error) };

        if !error.is_null() {
            // SAFETY: on failure libsandbox stores a malloc'd C string in `error`.
            let message = unsafe { CStr::from_ptr(error) }
                .to_string_lossy()
                .into_owned();
            // SAFETY: allocated with malloc by libsandbox and not used again.
            unsafe { libc::free(error.cast()) };
            if let Some(raw) = NonNull::new(raw) {
                drop(NativeProfile { raw });
            }
            return Err(CompileError::Native { message });
        }

        let raw = NonNull::new(raw).ok_or_else(|| CompileError::Native {
            message: "libsandbox returned neither a profile nor an error".into(),
        })?;
        Ok(Self { raw })
    }

    fn profile(&self) -> &SandboxProfile {
        // SAFETY: `raw` came from sandbox_compile_string and stays valid until drop.
        unsafe { self.raw.as_ref() }
    }

    pub fn kind(&self) -> u32 {
        self.profile().kind
    }

    pub fn bytecode(&self) -> &[u8] {
        let profile = self.profile();
        if profile.bytecode.is_null() || profile.bytecode_length == 0 {
            return &[];
        }
        // SAFETY: libsandbox guarantees `bytecode_length` readable bytes at
        // `bytecode` for the lifetime of the profile, which `&self` bounds.
        unsafe { std::slice::from_raw_parts(profile.bytecode.cast::<u8>(), profile.bytecode_length) }
    }

    /// Copy the type tag and bytecode into an owned profile.
    pub fn to_compiled(&self) -> CompiledProfile {
        CompiledProfile::new(self.kind(), self.bytecode().to_vec())
    }
}

impl Drop for NativeProfile {
    fn drop(&mut self) {
        // SAFETY: the pointer is owned by this value and freed only here.
        unsafe { sandbox_free_profile(self.raw.as_ptr()) };
    }
}

impl fmt::Debug for NativeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeProfile")
            .field("kind", &self.kind())
            .field("len", &self.bytecode().len())
            .finish()
    }
}

/// Compiler backed by libsandbox.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCompiler;

impl Compiler for NativeCompiler {
    fn compile(&self, source: &str, params: &Parameters) -> Result<CompiledProfile, CompileError> {
        if !params.is_empty() {
            return Err(CompileError::Unsupported(
                "the native backend does not accept parameters".into(),
            ));
        }
        let native = NativeProfile::compile(source)?;
        let compiled = native.to_compiled();
        debug!(kind = compiled.kind(), len = compiled.len(), "compiled with libsandbox");
        Ok(compiled)
    }
}
