//! CPU-feature-dispatched f32 distance kernels.
//!
//! [`kernels`] inspects the CPU once per process and returns a table of plain
//! function pointers: AVX2+FMA on x86_64 when available, NEON on aarch64, and
//! the scalar loops otherwise. The scalar kernels stay public so callers can
//! check that the accelerated path agrees within a relative tolerance.

use std::sync::OnceLock;

/// Signature shared by every kernel: two f32 slices in, one f32 out.
pub type KernelFn = fn(&[f32], &[f32]) -> f32;

/// The kernel set chosen for this process.
#[derive(Debug, Clone, Copy)]
pub struct Kernels {
    /// Human-readable name of the selected code path.
    pub name: &'static str,
    /// Dot product.
    pub dot: KernelFn,
    /// Squared Euclidean distance.
    pub l2_sq: KernelFn,
    /// Cosine similarity in \[-1, 1\]; 0 when either vector has zero norm.
    pub cosine: KernelFn,
}

static KERNELS: OnceLock<Kernels> = OnceLock::new();

/// Returns the process-wide kernel table, detecting CPU features on first call.
pub fn kernels() -> &'static Kernels {
    KERNELS.get_or_init(|| {
        let selected = detect();
        tracing::debug!(path = selected.name, "distance kernels selected");
        selected
    })
}

/// Scalar kernels. Always available.
pub const SCALAR: Kernels = Kernels {
    name: "scalar",
    dot: scalar_dot,
    l2_sq: scalar_l2_sq,
    cosine: scalar_cosine,
};

#[allow(unreachable_code)]
fn detect() -> Kernels {
    #[cfg(target_arch = "aarch64")]
    {
        return Kernels {
            name: "neon",
            dot: neon::dot,
            l2_sq: neon::l2_sq,
            cosine: neon::cosine,
        };
    }
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx2") && std::arch::is_x86_feature_detected!("fma")
        {
            return Kernels {
                name: "avx2+fma",
                dot: avx2::dot,
                l2_sq: avx2::l2_sq,
                cosine: avx2::cosine,
            };
        }
    }
    SCALAR
}

/// Truncates both slices to their common length so no kernel reads out of bounds.
#[inline(always)]
fn common<'a>(a: &'a [f32], b: &'a [f32]) -> (&'a [f32], &'a [f32]) {
    let len = a.len().min(b.len());
    (&a[..len], &b[..len])
}

pub fn scalar_dot(a: &[f32], b: &[f32]) -> f32 {
    let (a, b) = common(a, b);
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn scalar_l2_sq(a: &[f32], b: &[f32]) -> f32 {
    let (a, b) = common(a, b);
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

pub fn scalar_cosine(a: &[f32], b: &[f32]) -> f32 {
    let (a, b) = common(a, b);
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    dot / denom
}

// ============================================================================
// AVX2+FMA (x86_64)
// ============================================================================

#[cfg(target_arch = "x86_64")]
mod avx2 {
    use super::common;
    use std::arch::x86_64::*;

    // The safe wrappers are only installed by `detect` after the feature check.

    pub fn dot(a: &[f32], b: &[f32]) -> f32 {
        let (a, b) = common(a, b);
        unsafe { dot_impl(a, b) }
    }

    pub fn l2_sq(a: &[f32], b: &[f32]) -> f32 {
        let (a, b) = common(a, b);
        unsafe { l2_sq_impl(a, b) }
    }

    pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let (a, b) = common(a, b);
        unsafe { cosine_impl(a, b) }
    }

    #[inline]
    #[target_feature(enable = "avx2")]
    unsafe fn hsum(v: __m256) -> f32 {
        let hi128 = _mm256_extractf128_ps(v, 1);
        let lo128 = _mm256_castps256_ps128(v);
        let sum128 = _mm_add_ps(lo128, hi128);
        let hi64 = _mm_movehl_ps(sum128, sum128);
        let sum64 = _mm_add_ps(sum128, hi64);
        let hi32 = _mm_shuffle_ps(sum64, sum64, 0x55);
        _mm_cvtss_f32(_mm_add_ss(sum64, hi32))
    }

    #[target_feature(enable = "avx2,fma")]
    unsafe fn dot_impl(a: &[f32], b: &[f32]) -> f32 {
        let len = a.len();
        let (pa, pb) = (a.as_ptr(), b.as_ptr());
        let mut s0 = _mm256_setzero_ps();
        let mut s1 = _mm256_setzero_ps();

        let chunks = len / 16;
        for i in 0..chunks {
            let base = i * 16;
            s0 = _mm256_fmadd_ps(_mm256_loadu_ps(pa.add(base)), _mm256_loadu_ps(pb.add(base)), s0);
            s1 = _mm256_fmadd_ps(
                _mm256_loadu_ps(pa.add(base + 8)),
                _mm256_loadu_ps(pb.add(base + 8)),
                s1,
            );
        }
        let mut sum = hsum(_mm256_add_ps(s0, s1));
        for i in (chunks * 16)..len {
            sum += *pa.add(i) * *pb.add(i);
        }
        sum
    }

    #[target_feature(enable = "avx2,fma")]
    unsafe fn l2_sq_impl(a: &[f32], b: &[f32]) -> f32 {
        let len = a.len();
        let (pa, pb) = (a.as_ptr(), b.as_ptr());
        let mut s0 = _mm256_setzero_ps();
        let mut s1 = _mm256_setzero_ps();

        let chunks = len / 16;
        for i in 0..chunks {
            let base = i * 16;
            let d0 = _mm256_sub_ps(_mm256_loadu_ps(pa.add(base)), _mm256_loadu_ps(pb.add(base)));
            let d1 = _mm256_sub_ps(
                _mm256_loadu_ps(pa.add(base + 8)),
                _mm256_loadu_ps(pb.add(base + 8)),
            );
            s0 = _mm256_fmadd_ps(d0, d0, s0);
            s1 = _mm256_fmadd_ps(d1, d1, s1);
        }
        let mut sum = hsum(_mm256_add_ps(s0, s1));
        for i in (chunks * 16)..len {
            let d = *pa.add(i) - *pb.add(i);
            sum += d * d;
        }
        sum
    }

    #[target_feature(enable = "avx2,fma")]
    unsafe fn cosine_impl(a: &[f32], b: &[f32]) -> f32 {
        let len = a.len();
        let (pa, pb) = (a.as_ptr(), b.as_ptr());
        let mut dot = _mm256_setzero_ps();
        let mut na = _mm256_setzero_ps();
        let mut nb = _mm256_setzero_ps();

        let chunks = len / 8;
        for i in 0..chunks {
            let va = _mm256_loadu_ps(pa.add(i * 8));
            let vb = _mm256_loadu_ps(pb.add(i * 8));
            dot = _mm256_fmadd_ps(va, vb, dot);
            na = _mm256_fmadd_ps(va, va, na);
            nb = _mm256_fmadd_ps(vb, vb, nb);
        }
        let mut dot = hsum(dot);
        let mut norm_a = hsum(na);
        let mut norm_b = hsum(nb);
        for i in (chunks * 8)..len {
            let (x, y) = (*pa.add(i), *pb.add(i));
            dot += x * y;
            norm_a += x * x;
            norm_b += y * y;
        }
        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom < 1e-10 {
            return 0.0;
        }
        dot / denom
    }
}

// ============================================================================
// NEON (aarch64)
// ============================================================================

#[cfg(target_arch = "aarch64")]
mod neon {
    use super::common;
    use std::arch::aarch64::*;

    pub fn dot(a: &[f32], b: &[f32]) -> f32 {
        let (a, b) = common(a, b);
        unsafe { dot_impl(a, b) }
    }

    pub fn l2_sq(a: &[f32], b: &[f32]) -> f32 {
        let (a, b) = common(a, b);
        unsafe { l2_sq_impl(a, b) }
    }

    pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let (a, b) = common(a, b);
        unsafe { cosine_impl(a, b) }
    }

    unsafe fn dot_impl(a: &[f32], b: &[f32]) -> f32 {
        let len = a.len();
        let (pa, pb) = (a.as_ptr(), b.as_ptr());
        let mut s0 = vdupq_n_f32(0.0);
        let mut s1 = vdupq_n_f32(0.0);

        let chunks = len / 8;
        for i in 0..chunks {
            let base = i * 8;
            s0 = vfmaq_f32(s0, vld1q_f32(pa.add(base)), vld1q_f32(pb.add(base)));
            s1 = vfmaq_f32(s1, vld1q_f32(pa.add(base + 4)), vld1q_f32(pb.add(base + 4)));
        }
        let mut sum = vaddvq_f32(vaddq_f32(s0, s1));
        for i in (chunks * 8)..len {
            sum += *pa.add(i) * *pb.add(i);
        }
        sum
    }

    unsafe fn l2_sq_impl(a: &[f32], b: &[f32]) -> f32 {
        let len = a.len();
        let (pa, pb) = (a.as_ptr(), b.as_ptr());
        let mut s0 = vdupq_n_f32(0.0);
        let mut s1 = vdupq_n_f32(0.0);

        let chunks = len / 8;
        for i in 0..chunks {
            let base = i * 8;
            let d0 = vsubq_f32(vld1q_f32(pa.add(base)), vld1q_f32(pb.add(base)));
            let d1 = vsubq_f32(vld1q_f32(pa.add(base + 4)), vld1q_f32(pb.add(base + 4)));
            s0 = vfmaq_f32(s0, d0, d0);
            s1 = vfmaq_f32(s1, d1, d1);
        }
        let mut sum = vaddvq_f32(vaddq_f32(s0, s1));
        for i in (chunks * 8)..len {
            let d = *pa.add(i) - *pb.add(i);
            sum += d * d;
        }
        sum
    }

    unsafe fn cosine_impl(a: &[f32], b: &[f32]) -> f32 {
        let len = a.len();
        let (pa, pb) = (a.as_ptr(), b.as_ptr());
        let mut dot = vdupq_n_f32(0.0);
        let mut na = vdupq_n_f32(0.0);
        let mut nb = vdupq_n_f32(0.0);

        let chunks = len / 4;
        for i in 0..chunks {
            let va = vld1q_f32(pa.add(i * 4));
            let vb = vld1q_f32(pb.add(i * 4));
            dot = vfmaq_f32(dot, va, vb);
            na = vfmaq_f32(na, va, va);
            nb = vfmaq_f32(nb, vb, vb);
        }
        let mut dot = vaddvq_f32(dot);
        let mut norm_a = vaddvq_f32(na);
        let mut norm_b = vaddvq_f32(nb);
        for i in (chunks * 4)..len {
            let (x, y) = (*pa.add(i), *pb.add(i));
            dot += x * y;
            norm_a += x * x;
            norm_b += y * y;
        }
        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom < 1e-10 {
            return 0.0;
        }
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KERNEL_RELATIVE_TOLERANCE;

    fn sample(len: usize, seed: usize) -> Vec<f32> {
        (0..len)
            .map(|j| ((((seed + 1) * 2654435761 + j * 40503) & 0xFFFF) as f32 / 65535.0) - 0.5)
            .collect()
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() <= KERNEL_RELATIVE_TOLERANCE * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn test_selected_kernels_agree_with_scalar() {
        let k = kernels();
        for len in [1, 3, 7, 8, 15, 16, 17, 33, 128, 131] {
            let a = sample(len, 1);
            let b = sample(len, 2);
            assert!(close((k.dot)(&a, &b), scalar_dot(&a, &b)), "dot len={len}");
            assert!(close((k.l2_sq)(&a, &b), scalar_l2_sq(&a, &b)), "l2 len={len}");
            assert!(close((k.cosine)(&a, &b), scalar_cosine(&a, &b)), "cos len={len}");
        }
    }

    #[test]
    fn test_zero_norm_cosine() {
        let zero = vec![0.0f32; 9];
        let one = vec![1.0f32; 9];
        assert_eq!((kernels().cosine)(&zero, &one), 0.0);
        assert_eq!(scalar_cosine(&zero, &one), 0.0);
    }

    #[test]
    fn test_unequal_lengths_use_common_prefix() {
        let a = [1.0, 2.0, 3.0];
        let b = [1.0, 2.0];
        assert_eq!((kernels().l2_sq)(&a, &b), 0.0);
        assert_eq!(scalar_dot(&a, &b), 5.0);
    }

    #[test]
    fn test_kernels_detected_once() {
        let first = kernels() as *const Kernels;
        let second = kernels() as *const Kernels;
        assert_eq!(first, second);
    }
}
