//! Compatibility scoring between pretenders and worker resources.

use super::Identity;

/// Scores the compatibility of a pretender/resource pair.
///
/// `None` means the pair is incompatible; `Some(n)` is a compatibility score
/// where higher is better. Implementations must be pure functions of their
/// inputs so they can be called concurrently from selection, offer, and
/// return paths without coordination.
pub trait AffinityEvaluator: Send + Sync {
    /// Score `resource` for `pretender`, or `None` if incompatible.
    fn score(&self, pretender: &Identity, resource: &Identity) -> Option<u32>;
}

/// The default, symmetric scoring algorithm.
///
/// Each side's interests are tested against the other side's attributes. A
/// satisfied interest adds one point; a missed *mandatory* interest vetoes
/// the whole match; a missed soft interest is simply not scored. The final
/// score is the sum of both directions, letting worker and pretender each
/// impose hard constraints while soft matches accumulate as tie-breakers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleAffinityEvaluator;

impl SimpleAffinityEvaluator {
    /// Score `subject`'s attributes against the interests declared by
    /// `declarer`. `None` on any mandatory miss.
    fn score_one_way(subject: &Identity, declarer: &Identity) -> Option<u32> {
        let mut score = 0;
        for (key, interest) in declarer.interests() {
            match subject.attributes().get(key) {
                Some(value) if interest.matches(value) => score += 1,
                _ if interest.is_mandatory() => return None,
                _ => {}
            }
        }
        Some(score)
    }
}

impl AffinityEvaluator for SimpleAffinityEvaluator {
    fn score(&self, pretender: &Identity, resource: &Identity) -> Option<u32> {
        // Fail fast: the reverse direction is only evaluated when the first
        // one did not veto.
        let forward = Self::score_one_way(pretender, resource)?;
        let backward = Self::score_one_way(resource, pretender)?;
        Some(forward + backward)
    }
}
