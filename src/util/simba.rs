use simba::simd::{SimdBool, SimdValue, WideBoolF32x4, WideBoolF32x8, WideF32x4, WideF32x8};

/// Operations that simba does not expose uniformly over `f32` and the wide types.
pub trait SimbaWorkarounds: SimdValue {
    fn is_nan(self) -> Self::SimdBool;

    fn infinity() -> Self;
    fn neg_infinity() -> Self;
}

impl SimbaWorkarounds for f32 {
    #[inline(always)]
    fn is_nan(self) -> bool {
        f32::is_nan(self)
    }

    #[inline(always)]
    fn infinity() -> Self {
        f32::INFINITY
    }

    #[inline(always)]
    fn neg_infinity() -> Self {
        f32::NEG_INFINITY
    }
}

impl SimbaWorkarounds for WideF32x4 {
    #[inline(always)]
    fn is_nan(self) -> Self::SimdBool {
        WideBoolF32x4(self.0.is_nan())
    }

    #[inline(always)]
    fn infinity() -> Self {
        Self::splat(f32::INFINITY)
    }

    #[inline(always)]
    fn neg_infinity() -> Self {
        Self::splat(f32::NEG_INFINITY)
    }
}

impl SimbaWorkarounds for WideF32x8 {
    #[inline(always)]
    fn is_nan(self) -> Self::SimdBool {
        WideBoolF32x8(self.0.is_nan())
    }

    #[inline(always)]
    fn infinity() -> Self {
        Self::splat(f32::INFINITY)
    }

    #[inline(always)]
    fn neg_infinity() -> Self {
        Self::splat(f32::NEG_INFINITY)
    }
}

/// Converts a flat iterator of elements into an iterator of SIMD values and mask.
/// If input iterator length is not divisible by T::LANES, remainder of the last
/// vector will be filled with the content of T::default() and mask will be false.
pub fn simd_windows<T: SimdValue + Default>(
    value: impl IntoIterator<Item = T::Element>,
) -> impl Iterator<Item = (T, T::SimdBool)>
where
    T::SimdBool: SimdValue,
    <T::SimdBool as SimdValue>::Element: From<bool>,
{
    let mut iter = value.into_iter();
    std::iter::from_fn(move || {
        let mut t = T::default();
        let mut mask = <T::SimdBool as SimdValue>::splat(false.into());

        for (j, v) in (0..T::LANES).zip(&mut iter) {
            t.replace(j, v);
            mask.replace(j, true.into());
        }

        if mask.any() { Some((t, mask)) } else { None }
    })
}

pub fn simd_element_iter<T: SimdValue>(value: T) -> impl Iterator<Item = T::Element> {
    (0..T::LANES).map(move |i| value.extract(i))
}

/// Bitmask of a SIMD bool limited to the lanes that actually exist.
pub fn lane_bits<B: SimdBool>(mask: B, lanes: usize) -> u64 {
    let all = if lanes >= 64 { u64::MAX } else { (1u64 << lanes) - 1 };
    mask.bitmask() & all
}
