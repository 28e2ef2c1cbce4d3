use std::collections::BTreeMap;

pub const DEFAULT_K: f64 = 20.0;
pub const PAIRWISE_K: f64 = 30.0;
pub const BASE_RATING: f64 = 1000.0;

/// Plain Elo table keyed by persona.
#[derive(Clone, Debug)]
pub struct Elo {
    k: f64,
    base: f64,
    ratings: BTreeMap<String, f64>,
}

impl Default for Elo {
    fn default() -> Self {
        Self::new(DEFAULT_K)
    }
}

impl Elo {
    pub fn new(k: f64) -> Self {
        Self {
            k,
            base: BASE_RATING,
            ratings: BTreeMap::new(),
        }
    }

    pub fn seed(&mut self, name: &str) {
        self.ratings.entry(name.to_string()).or_insert(self.base);
    }

    pub fn rating(&self, name: &str) -> f64 {
        self.ratings.get(name).copied().unwrap_or(self.base)
    }

    /// Probability that a player rated `ra` beats one rated `rb`.
    pub fn expected(ra: f64, rb: f64) -> f64 {
        1.0 / (1.0 + 10f64.powf((rb - ra) / 400.0))
    }

    pub fn update(&mut self, winner: &str, loser: &str) {
        let ra = self.rating(winner);
        let rb = self.rating(loser);
        let ea = Self::expected(ra, rb);
        let eb = Self::expected(rb, ra);
        self.ratings.insert(winner.to_string(), ra + self.k * (1.0 - ea));
        self.ratings.insert(loser.to_string(), rb + self.k * (0.0 - eb));
    }

    /// Highest rating first; equal ratings keep name order.
    pub fn leaderboard(&self) -> Vec<(String, f64)> {
        let mut board: Vec<(String, f64)> = self
            .ratings
            .iter()
            .map(|(name, rating)| (name.clone(), *rating))
            .collect();
        board.sort_by(|a, b| b.1.total_cmp(&a.1));
        board
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_players_split_k() {
        let mut elo = Elo::default();
        elo.update("a", "b");
        assert!((elo.rating("a") - 1010.0).abs() < 1e-9);
        assert!((elo.rating("b") - 990.0).abs() < 1e-9);
    }

    #[test]
    fn expected_is_symmetric() {
        let e = Elo::expected(1200.0, 1000.0);
        assert!((e + Elo::expected(1000.0, 1200.0) - 1.0).abs() < 1e-12);
        assert!(e > 0.75 && e < 0.77);
    }

    #[test]
    fn leaderboard_orders_by_rating() {
        let mut elo = Elo::new(PAIRWISE_K);
        elo.seed("c");
        elo.update("b", "a");
        elo.update("b", "c");
        let names: Vec<_> = elo.leaderboard().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names[0], "b");
        assert_eq!(names.len(), 3);
    }
}
