//! MurmurHash implementations used for key distribution.

const M2: u32 = 0x5bd1e995;
const R2: u32 = 24;

/// 32-bit MurmurHash2.
pub fn murmur_hash2(data: &[u8], seed: u32) -> i32 {
    let len = data.len();
    let mut h = seed ^ len as u32;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M2);
        k ^= k >> R2;
        k = k.wrapping_mul(M2);
        h = h.wrapping_mul(M2);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        h ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M2);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M2);
    h ^= h >> 15;
    h as i32
}

const C1: u32 = 0xcc9e2d51;
const C2: u32 = 0x1b873593;

fn mix_k1(k1: u32) -> u32 {
    k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
}

/// 32-bit MurmurHash3 for x86.
pub fn murmur_hash3_x86_32(data: &[u8], seed: u32) -> i32 {
    let len = data.len();
    let mut h1 = seed;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let k1 = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        h1 ^= mix_k1(k1);
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let tail = chunks.remainder();
    let mut k1: u32 = 0;
    for (i, b) in tail.iter().enumerate() {
        k1 ^= (*b as u32) << (8 * i);
    }
    if !tail.is_empty() {
        h1 ^= mix_k1(k1);
    }

    h1 ^= len as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85ebca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2ae35);
    h1 ^= h1 >> 16;
    h1 as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmur3_reference_vectors() {
        assert_eq!(murmur_hash3_x86_32(b"", 0), 0);
        assert_eq!(murmur_hash3_x86_32(b"", 1) as u32, 0x514E28B7);
        assert_eq!(murmur_hash3_x86_32(b"hello", 0) as u32, 0x248BFA47);
        assert_eq!(
            murmur_hash3_x86_32(b"The quick brown fox jumps over the lazy dog", 0) as u32,
            0x2E4FF723
        );
    }

    #[test]
    fn test_murmur2_reference_vectors() {
        assert_eq!(murmur_hash2(b"", 0), 0);
        assert_eq!(murmur_hash2(b"hello", 0) as u32, 0xE56129CB);
    }

    #[test]
    fn test_every_tail_length() {
        let data = b"abcdefgh";
        for len in 0..=data.len() {
            assert_eq!(murmur_hash2(&data[..len], 9001), murmur_hash2(&data[..len], 9001));
            assert_eq!(
                murmur_hash3_x86_32(&data[..len], 9001),
                murmur_hash3_x86_32(&data[..len], 9001)
            );
        }
        assert_ne!(murmur_hash3_x86_32(b"abc", 9001), murmur_hash3_x86_32(b"abd", 9001));
    }
}
