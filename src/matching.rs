use crate::features::Descriptor;
use bitarray::Hamming;
use space::{Knn, LinearKnn};

/// This function performs non-symmetric matching from `a` to `b`.
///
/// A feature in `a` is matched to its nearest neighbor in `b` only if the nearest neighbor
/// is closer than `lowes_ratio` times the distance to the second nearest neighbor.
/// Features with fewer than two candidates cannot be tested and are left unmatched.
pub fn matching(a: &[Descriptor], b: &[Descriptor], lowes_ratio: f32) -> Vec<Option<usize>> {
    let knn_b = LinearKnn {
        metric: Hamming,
        iter: b.iter(),
    };
    a.iter()
        .map(|descriptor| {
            let knn = knn_b.knn(descriptor, 2);
            if knn.len() < 2 {
                return None;
            }
            if (knn[0].distance as f32) < knn[1].distance as f32 * lowes_ratio {
                Some(knn[0].index)
            } else {
                None
            }
        })
        .collect()
}

/// This function performs symmetric matching between `a` and `b`.
///
/// Symmetric matching requires a feature in `b` to be the best match for a feature in `a`
/// and for the same feature in `a` to be the best match for the same feature in `b`.
/// Both directions must also pass the ratio test. This suppresses ambiguous matches in
/// repetitive street scenery (windows, fences, lane markings).
pub fn symmetric_matching(a: &[Descriptor], b: &[Descriptor], lowes_ratio: f32) -> Vec<[usize; 2]> {
    let forward_matches = matching(a, b, lowes_ratio);
    let reverse_matches = matching(b, a, lowes_ratio);
    forward_matches
        .into_iter()
        .enumerate()
        .filter_map(move |(aix, bix)| {
            bix.map(|bix| [aix, bix])
                .filter(|&[aix, bix]| reverse_matches[bix] == Some(aix))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg64;

    fn random_descriptors(rng: &mut Pcg64, n: usize) -> Vec<Descriptor> {
        (0..n)
            .map(|_| {
                let mut bytes = [0u8; 64];
                rng.fill(&mut bytes[..]);
                Descriptor::new(bytes)
            })
            .collect()
    }

    #[test]
    fn identical_descriptors_match_themselves() {
        let mut rng = Pcg64::from_seed([3; 32]);
        let descriptors = random_descriptors(&mut rng, 50);
        let matches = symmetric_matching(&descriptors, &descriptors, 0.75);
        assert_eq!(matches.len(), 50);
        assert!(matches.iter().all(|&[a, b]| a == b));
    }

    #[test]
    fn unrelated_descriptors_do_not_match() {
        let mut rng = Pcg64::from_seed([4; 32]);
        let a = random_descriptors(&mut rng, 100);
        let b = random_descriptors(&mut rng, 100);
        assert!(symmetric_matching(&a, &b, 0.75).len() < 3);
    }

    #[test]
    fn a_single_candidate_is_never_matched() {
        let mut rng = Pcg64::from_seed([5; 32]);
        let a = random_descriptors(&mut rng, 4);
        assert_eq!(matching(&a, &a[..1], 0.75), vec![None; 4]);
    }
}
