//! Poseidon hashing wrappers
//!
//! All commitments, nullifiers, note public keys, token hashes, and merkle
//! nodes use Poseidon over the BN254 scalar field with circom parameters, so
//! hashes here match the pool's circuits byte-for-byte.

use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonHasher};

/// Widest parameter set shipped with the circom constants
const MAX_ARITY: usize = 12;

/// Poseidon over up to twelve field elements; wider inputs are chunk-hashed
pub fn poseidon(inputs: &[Fr]) -> Fr {
    assert!(!inputs.is_empty(), "poseidon over empty input");
    if inputs.len() <= MAX_ARITY {
        let mut hasher =
            Poseidon::<Fr>::new_circom(inputs.len()).expect("arity within circom parameter set");
        return hasher.hash(inputs).expect("input count matches arity");
    }
    // Fold wide inputs: hash each chunk, then hash the chunk digests.
    let digests: Vec<Fr> = inputs.chunks(MAX_ARITY).map(poseidon).collect();
    poseidon(&digests)
}

pub fn poseidon1(a: Fr) -> Fr {
    poseidon(&[a])
}

pub fn poseidon2(a: Fr, b: Fr) -> Fr {
    poseidon(&[a, b])
}

pub fn poseidon3(a: Fr, b: Fr, c: Fr) -> Fr {
    poseidon(&[a, b, c])
}

/// Merkle node hash
pub fn hash_left_right(left: Fr, right: Fr) -> Fr {
    poseidon2(left, right)
}
