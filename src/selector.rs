// Exposure-weighted random selection.
//
// Under-exposed players get proportionally more weight so their ratings
// converge; every candidate keeps a weight of at least 1.

use rand::Rng;

use crate::model::Player;

/// Selection weight for a player given the population-wide maximum exposure.
pub fn exposure_weight(exposure_count: i64, max_exposure: i64) -> u64 {
    let weight = max_exposure.saturating_sub(exposure_count).saturating_add(1);
    weight.max(1) as u64
}

/// Pick one player, excluding the ids in `exclude`.
///
/// `max_exposure` is taken over the whole population, not only the candidates.
/// Returns `None` when no candidate remains.
pub fn select_weighted<'a, R: Rng + ?Sized>(
    population: &'a [Player],
    exclude: &[&str],
    rng: &mut R,
) -> Option<&'a Player> {
    let max_exposure = population
        .iter()
        .map(|p| p.exposure_count)
        .max()
        .unwrap_or(0);

    let candidates: Vec<(&Player, u64)> = population
        .iter()
        .filter(|p| !exclude.contains(&p.id.as_str()))
        .map(|p| (p, exposure_weight(p.exposure_count, max_exposure)))
        .collect();

    let total: u64 = candidates.iter().map(|(_, w)| *w).sum();
    if total == 0 {
        return None;
    }

    let mut remaining = rng.gen_range(0..total);
    for (player, weight) in &candidates {
        if remaining < *weight {
            return Some(*player);
        }
        remaining -= weight;
    }

    // Unreachable while the weights sum to `total`.
    candidates.last().map(|(p, _)| *p)
}
