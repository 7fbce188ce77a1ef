//! Zero-allocation-on-finalize binary hasher used to fingerprint cache keys.
//!
//! Mirrors the append-then-finalize pattern used throughout the source engine's
//! shader reflection and cache-key code: every field is appended as raw bytes
//! (strings length-prefixed), then the whole buffer is folded with FNV-1a.

/// FNV-1a offset basis / prime for 64-bit hashes.
const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// A 64-bit content-derived cache key.
pub type Fingerprint = u64;

/// Append-and-finalize builder for [`Fingerprint`]s.
///
/// ```
/// use cache_system::hash::CacheKeyHasher;
///
/// let mut a = CacheKeyHasher::new();
/// a.add(&42u32).add_str("shaders/a.vert");
/// let mut b = CacheKeyHasher::new();
/// b.add(&42u32).add_str("shaders/a.vert");
/// assert_eq!(a.finalize(), b.finalize());
/// ```
#[derive(Debug, Default, Clone)]
pub struct CacheKeyHasher {
    buffer: Vec<u8>,
}

impl CacheKeyHasher {
    /// Create a new hasher with a pre-reserved buffer sized for a typical key.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
        }
    }

    /// Append the raw bytes of a `Pod` value (integers, enums cast to their
    /// repr, quantized floats, never a raw `f32`/`f64`; see [`Self::add_f32_quantized`]).
    pub fn add<T: bytemuck::Pod>(&mut self, value: &T) -> &mut Self {
        self.buffer.extend_from_slice(bytemuck::bytes_of(value));
        self
    }

    /// Append a length-prefixed string so that e.g. `"ab"+"c"` cannot collide
    /// with `"a"+"bc"`.
    pub fn add_str(&mut self, s: &str) -> &mut Self {
        self.add(&(s.len() as u32));
        self.buffer.extend_from_slice(s.as_bytes());
        self
    }

    /// Append raw bytes without a length prefix. Prefer [`Self::add_bytes_prefixed`]
    /// unless the caller already guarantees a fixed-size field.
    pub fn add_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(bytes);
        self
    }

    /// Append a length-prefixed byte slice.
    pub fn add_bytes_prefixed(&mut self, bytes: &[u8]) -> &mut Self {
        self.add(&(bytes.len() as u32));
        self.buffer.extend_from_slice(bytes);
        self
    }

    /// Append an ordered sequence of `Pod` values, length-prefixed.
    pub fn add_slice<T: bytemuck::Pod>(&mut self, values: &[T]) -> &mut Self {
        self.add(&(values.len() as u32));
        for v in values {
            self.add(v);
        }
        self
    }

    /// Quantize a float (`f * 10000` truncated to `i32`) before hashing, to
    /// avoid floating-point instability across platforms/compilers.
    pub fn add_f32_quantized(&mut self, value: f32) -> &mut Self {
        let quantized = (value * 10000.0) as i32;
        self.add(&quantized)
    }

    /// Current buffer length, useful for debug assertions.
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Reset the hasher so its allocation can be reused.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Fold the appended bytes into a 64-bit fingerprint.
    pub fn finalize(&self) -> Fingerprint {
        fnv1a(&self.buffer)
    }

    /// Hash a `Pod` value's raw bytes directly, used for the debug-only
    /// content-hash side-table (spec invariant I2), not for key construction.
    pub fn content_hash_of<T: bytemuck::Pod>(value: &T) -> u64 {
        fnv1a(bytemuck::bytes_of(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_fields_produce_identical_keys() {
        let mut h1 = CacheKeyHasher::new();
        h1.add(&7u32).add_str("main").add_f32_quantized(1.5);
        let mut h2 = CacheKeyHasher::new();
        h2.add(&7u32).add_str("main").add_f32_quantized(1.5);
        assert_eq!(h1.finalize(), h2.finalize());
    }

    #[test]
    fn string_length_prefix_prevents_concatenation_collisions() {
        let mut h1 = CacheKeyHasher::new();
        h1.add_str("ab").add_str("c");
        let mut h2 = CacheKeyHasher::new();
        h2.add_str("a").add_str("bc");
        assert_ne!(h1.finalize(), h2.finalize());
    }

    #[test]
    fn differing_fields_produce_different_keys() {
        let mut h1 = CacheKeyHasher::new();
        h1.add_str("main");
        let mut h2 = CacheKeyHasher::new();
        h2.add_str("mainVS");
        assert_ne!(h1.finalize(), h2.finalize());
    }

    #[test]
    fn reset_allows_reuse() {
        let mut h = CacheKeyHasher::new();
        h.add_str("main");
        let first = h.finalize();
        h.reset();
        h.add_str("other");
        assert_ne!(h.finalize(), first);
    }
}
