//! The byte scrambling some cabinet authors apply to file data.
//!
//! This is not encryption: each byte is XORed with a constant, rotated, and
//! offset by a running seed.  The seed starts at zero at the beginning of a
//! file's data and advances by one per byte, so callers reading a file in
//! pieces must carry the returned seed into the next call.

const XOR_KEY: u8 = 0xd5;
const SEED_MODULUS: u32 = 0x47;
const ROTATION: u32 = 2;

/// Reverses the obfuscation of `buf` in place, starting with the given seed,
/// and returns the seed to use for the bytes that follow.
pub fn deobfuscate(buf: &mut [u8], seed: u32) -> u32 {
    let mut seed = seed;
    for byte in buf.iter_mut() {
        *byte = (*byte ^ XOR_KEY)
            .rotate_right(ROTATION)
            .wrapping_sub((seed % SEED_MODULUS) as u8);
        seed = seed.wrapping_add(1);
    }
    seed
}

/// Obfuscates `buf` in place, starting with the given seed, and returns the
/// seed to use for the bytes that follow.  This is the exact inverse of
/// [`deobfuscate`].
pub fn obfuscate(buf: &mut [u8], seed: u32) -> u32 {
    let mut seed = seed;
    for byte in buf.iter_mut() {
        *byte = byte
            .wrapping_add((seed % SEED_MODULUS) as u8)
            .rotate_left(ROTATION)
            ^ XOR_KEY;
        seed = seed.wrapping_add(1);
    }
    seed
}

#[cfg(test)]
mod tests {
    use rand::{Rng, RngCore, SeedableRng};

    use super::{deobfuscate, obfuscate};

    #[test]
    fn deobfuscate_known_bytes() {
        // 0x00 ^ 0xd5 = 0xd5, ror 2 = 0x75, minus seed 0 => 0x75.
        let mut data = [0x00, 0x00];
        let seed = deobfuscate(&mut data, 0);
        assert_eq!(data[0], 0x75);
        assert_eq!(data[1], 0x74);
        assert_eq!(seed, 2);
    }

    #[test]
    fn seed_wraps_at_modulus() {
        let mut a = [0x42u8];
        let mut b = [0x42u8];
        deobfuscate(&mut a, 3);
        deobfuscate(&mut b, 3 + 0x47);
        assert_eq!(a, b);
    }

    #[test]
    fn split_reads_carry_the_seed() {
        let original = lipsum::lipsum(200).into_bytes();
        let mut whole = original.clone();
        obfuscate(&mut whole, 0);

        let mut pieces = whole.clone();
        let (head, tail) = pieces.split_at_mut(77);
        let seed = deobfuscate(head, 0);
        assert_eq!(seed, 77);
        deobfuscate(tail, seed);
        assert_eq!(pieces, original);
    }

    #[test]
    fn round_trip_random_data_and_seeds() {
        let mut rng = rand::rngs::SmallRng::seed_from_u64(0x15c0);
        for _ in 0..200 {
            let len = rng.gen_range(0..512);
            let mut data = vec![0u8; len];
            rng.fill_bytes(&mut data);
            let seed: u32 = rng.gen();
            let original = data.clone();
            let after_encode = obfuscate(&mut data, seed);
            let after_decode = deobfuscate(&mut data, seed);
            assert_eq!(data, original);
            assert_eq!(after_encode, after_decode);
        }
    }
}
