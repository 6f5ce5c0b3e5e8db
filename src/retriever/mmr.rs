use crate::embedding::cosine_similarity;

/// Maximal marginal relevance selection
///
/// Picks up to `k` candidate indices, starting with the one most similar to `query`,
/// then repeatedly the candidate maximizing
/// `lambda_mult * sim(query, c) - (1 - lambda_mult) * max(sim(c, selected))`.
/// Returned indices are in selection order.
pub fn maximal_marginal_relevance(
    query: &[f32],
    candidates: &[Vec<f32>],
    lambda_mult: f32,
    k: usize,
) -> Vec<usize> {
    let target = k.min(candidates.len());
    if target == 0 {
        return Vec::new();
    }

    let relevance: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query, c))
        .collect();

    let mut first = 0;
    for (i, rel) in relevance.iter().enumerate() {
        if *rel > relevance[first] {
            first = i;
        }
    }

    let mut selected = vec![first];
    // Highest similarity of each candidate to anything selected so far
    let mut redundancy: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(c, &candidates[first]))
        .collect();

    while selected.len() < target {
        let mut best: Option<(usize, f32)> = None;

        for (i, &rel) in relevance.iter().enumerate() {
            if selected.contains(&i) {
                continue;
            }
            let score = lambda_mult * rel - (1.0 - lambda_mult) * redundancy[i];
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((i, score));
            }
        }

        let Some((next, _)) = best else { break };
        selected.push(next);

        for (i, c) in candidates.iter().enumerate() {
            redundancy[i] = redundancy[i].max(cosine_similarity(c, &candidates[next]));
        }
    }

    selected
}
