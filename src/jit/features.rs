//! Host capability checks.

/// Whether the host can run the 128-bit vector loop.
///
/// x86_64 needs SSE4.1 (extending loads, 32-bit lane multiply) and SSE4.2
/// (64-bit lane compares); aarch64 needs NEON.
pub fn simd_supported() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        std::is_x86_feature_detected!("sse4.1") && std::is_x86_feature_detected!("sse4.2")
    }
    #[cfg(target_arch = "aarch64")]
    {
        std::arch::is_aarch64_feature_detected!("neon")
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        false
    }
}

/// Whether native code can be generated for the host at all
pub fn jit_supported() -> bool {
    cfg!(target_pointer_width = "64") && cranelift_native::builder().is_ok()
}

/// One-line summary for diagnostics
pub fn describe() -> String {
    format!(
        "{} jit={} simd={}",
        std::env::consts::ARCH,
        jit_supported(),
        simd_supported()
    )
}
