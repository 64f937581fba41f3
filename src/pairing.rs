// Pair generation with repeat avoidance.
//
// Each pair draws player A by exposure weight, then player B by exposure
// weight excluding A. Pairs whose key was resolved recently, or already
// produced in the same batch, are redrawn up to a fixed attempt budget.

use std::collections::{HashSet, VecDeque};

use rand::Rng;

use crate::error::PairingError;
use crate::metrics;
use crate::model::{Pair, PairKey, Player};
use crate::selector::select_weighted;

/// Redraws allowed per requested pair before the batch stops early.
pub const MAX_ATTEMPTS_PER_PAIR: usize = 50;

/// How many resolved pairs are remembered for rematch suppression.
pub const RECENT_PAIRS_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
struct RecentEntry {
    key: PairKey,
    pair_id: String,
}

/// Bounded, most-recent-first memory of resolved pairs.
///
/// Each entry remembers both the unordered participant key (used to suppress
/// rematches) and the pair id it was resolved under (used to reject a second
/// vote on the same displayed pair). Oldest entries are evicted first.
#[derive(Debug, Clone)]
pub struct RecentPairs {
    capacity: usize,
    entries: VecDeque<RecentEntry>,
}

impl RecentPairs {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// Record a resolved pair, evicting the oldest entry when over capacity.
    pub fn push(&mut self, key: PairKey, pair_id: impl Into<String>) {
        self.entries.push_front(RecentEntry {
            key,
            pair_id: pair_id.into(),
        });
        self.entries.truncate(self.capacity);
    }

    pub fn contains_pair_id(&self, pair_id: &str) -> bool {
        self.entries.iter().any(|e| e.pair_id == pair_id)
    }

    pub fn contains_key(&self, key: &PairKey) -> bool {
        self.entries.iter().any(|e| &e.key == key)
    }

    /// Keys, most recent first.
    pub fn keys(&self) -> impl Iterator<Item = &PairKey> {
        self.entries.iter().map(|e| &e.key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RecentPairs {
    fn default() -> Self {
        Self::new(RECENT_PAIRS_CAPACITY)
    }
}

/// Build the pair id: both participant ids, the generation time and the batch index.
pub fn pair_id(a: &str, b: &str, timestamp_ms: i64, batch_index: usize) -> String {
    format!("{a}-{b}-{timestamp_ms}-{batch_index}")
}

/// Generate up to `count` pairs from `players`.
///
/// `avoid` holds keys that must not be produced (recently resolved pairs and
/// pairs already waiting in the queue). Fewer than `count` pairs come back
/// when the attempt budget runs out; the only error is a population of fewer
/// than two players.
pub fn generate_pairs<R: Rng + ?Sized>(
    players: &[Player],
    avoid: &HashSet<PairKey>,
    count: usize,
    rng: &mut R,
) -> Result<Vec<Pair>, PairingError> {
    if players.len() < 2 {
        return Err(PairingError::InsufficientPopulation {
            available: players.len(),
        });
    }

    let timestamp = chrono::Utc::now().timestamp_millis();
    let mut batch_keys: HashSet<PairKey> = HashSet::new();
    let mut pairs = Vec::with_capacity(count);

    'batch: for index in 0..count {
        for _ in 0..MAX_ATTEMPTS_PER_PAIR {
            let Some(a) = select_weighted(players, &[], rng) else {
                break 'batch;
            };
            let Some(b) = select_weighted(players, &[a.id.as_str()], rng) else {
                break 'batch;
            };

            let key = PairKey::new(&a.id, &b.id);
            if avoid.contains(&key) || batch_keys.contains(&key) {
                continue;
            }

            batch_keys.insert(key);
            pairs.push(Pair {
                id: pair_id(&a.id, &b.id, timestamp, index),
                player_a: a.clone(),
                player_b: b.clone(),
            });
            continue 'batch;
        }

        metrics::GENERATION_EXHAUSTED_TOTAL.inc();
        tracing::debug!(
            "Pair generation exhausted after {} of {count} pairs",
            pairs.len()
        );
        break;
    }

    metrics::PAIRS_GENERATED_TOTAL.inc_by(pairs.len() as u64);
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn roster(n: usize) -> Vec<Player> {
        (0..n)
            .map(|i| Player::new(format!("p{i}"), format!("Player {i}"), "⚽"))
            .collect()
    }

    #[test]
    fn test_recent_pairs_evicts_oldest() {
        let mut recent = RecentPairs::new(10);
        for i in 0..15 {
            recent.push(PairKey::new(&format!("a{i}"), "b"), format!("pair-{i}"));
        }
        assert_eq!(recent.len(), 10);
        for i in 0..5 {
            assert!(!recent.contains_pair_id(&format!("pair-{i}")));
            assert!(!recent.contains_key(&PairKey::new(&format!("a{i}"), "b")));
        }
        for i in 5..15 {
            assert!(recent.contains_pair_id(&format!("pair-{i}")));
        }
        // Most recent first.
        assert_eq!(recent.keys().next(), Some(&PairKey::new("a14", "b")));
    }

    #[test]
    fn test_recent_pairs_never_exceeds_capacity() {
        let mut recent = RecentPairs::new(3);
        for i in 0..100 {
            recent.push(PairKey::new("x", &i.to_string()), i.to_string());
            assert!(recent.len() <= recent.capacity());
        }
    }

    #[test]
    fn test_insufficient_population() {
        let mut rng = StdRng::seed_from_u64(0);
        let err = generate_pairs(&roster(1), &HashSet::new(), 3, &mut rng).unwrap_err();
        assert!(matches!(
            err,
            PairingError::InsufficientPopulation { available: 1 }
        ));
        assert!(generate_pairs(&[], &HashSet::new(), 1, &mut rng).is_err());
    }

    #[test]
    fn test_participants_always_distinct() {
        let players = roster(6);
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            for pair in generate_pairs(&players, &HashSet::new(), 5, &mut rng).unwrap() {
                assert_ne!(pair.player_a.id, pair.player_b.id);
            }
        }
    }

    #[test]
    fn test_no_duplicate_keys_within_batch() {
        let players = roster(5);
        let mut rng = StdRng::seed_from_u64(5);
        let pairs = generate_pairs(&players, &HashSet::new(), 10, &mut rng).unwrap();
        let keys: HashSet<PairKey> = pairs.iter().map(Pair::key).collect();
        assert_eq!(keys.len(), pairs.len());
        // 5 players give exactly 10 distinct pairs; the budget may stop a
        // little short of finding the last ones.
        assert!(pairs.len() >= 5);
    }

    #[test]
    fn test_avoid_set_respected() {
        let players = roster(4);
        let mut avoid = HashSet::new();
        avoid.insert(PairKey::new("p0", "p1"));
        avoid.insert(PairKey::new("p2", "p3"));
        let mut rng = StdRng::seed_from_u64(21);
        for _ in 0..50 {
            for pair in generate_pairs(&players, &avoid, 3, &mut rng).unwrap() {
                assert!(!avoid.contains(&pair.key()));
            }
        }
    }

    #[test]
    fn test_two_players_exhaust_after_one_pair() {
        let players = roster(2);
        let mut rng = StdRng::seed_from_u64(2);
        let pairs = generate_pairs(&players, &HashSet::new(), 5, &mut rng).unwrap();
        assert_eq!(pairs.len(), 1);

        let mut avoid = HashSet::new();
        avoid.insert(pairs[0].key());
        let again = generate_pairs(&players, &avoid, 5, &mut rng).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_pair_ids_unique_across_batches() {
        let players = roster(2);
        let mut rng = StdRng::seed_from_u64(8);
        let first = generate_pairs(&players, &HashSet::new(), 1, &mut rng).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = generate_pairs(&players, &HashSet::new(), 1, &mut rng).unwrap();
        assert_eq!(first[0].key(), second[0].key());
        assert_ne!(first[0].id, second[0].id);
    }

    #[test]
    fn test_pair_id_format() {
        assert_eq!(pair_id("a", "b", 1700, 3), "a-b-1700-3");
    }
}
