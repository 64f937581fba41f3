// Glicko-2 update (Glickman, 2012) applied by the store when a vote commits.
//
// Every vote is its own rating period with a single game, so both sides are
// updated from their pre-vote states.

use std::f64::consts::PI;

const SCALE: f64 = 173.7178;
const BASE_RATING: f64 = 1500.0;
/// System constant constraining volatility change.
const TAU: f64 = 0.5;
const CONVERGENCE: f64 = 1e-6;
const MAX_ITERATIONS: usize = 100;
const MAX_DEVIATION: f64 = 350.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlickoState {
    pub rating: f64,
    pub deviation: f64,
    pub volatility: f64,
}

fn to_mu(rating: f64) -> f64 {
    (rating - BASE_RATING) / SCALE
}

fn to_phi(deviation: f64) -> f64 {
    deviation / SCALE
}

fn g(phi: f64) -> f64 {
    1.0 / (1.0 + 3.0 * phi * phi / (PI * PI)).sqrt()
}

fn e(mu: f64, mu_j: f64, phi_j: f64) -> f64 {
    1.0 / (1.0 + (-g(phi_j) * (mu - mu_j)).exp())
}

/// New volatility via the Illinois variant of regula falsi.
fn new_volatility(phi: f64, sigma: f64, v: f64, delta: f64) -> f64 {
    let a = (sigma * sigma).ln();
    let f = |x: f64| {
        let ex = x.exp();
        let denom = phi * phi + v + ex;
        ex * (delta * delta - phi * phi - v - ex) / (2.0 * denom * denom) - (x - a) / (TAU * TAU)
    };

    let mut big_a = a;
    let mut big_b = if delta * delta > phi * phi + v {
        (delta * delta - phi * phi - v).ln()
    } else {
        let mut k = 1.0;
        while f(a - k * TAU) < 0.0 && k < MAX_ITERATIONS as f64 {
            k += 1.0;
        }
        a - k * TAU
    };

    let mut f_a = f(big_a);
    let mut f_b = f(big_b);
    for _ in 0..MAX_ITERATIONS {
        if (big_b - big_a).abs() <= CONVERGENCE {
            break;
        }
        let big_c = big_a + (big_a - big_b) * f_a / (f_b - f_a);
        let f_c = f(big_c);
        if f_c * f_b <= 0.0 {
            big_a = big_b;
            f_a = f_b;
        } else {
            f_a /= 2.0;
        }
        big_b = big_c;
        f_b = f_c;
    }

    (big_a / 2.0).exp()
}

/// Update `player` after one game against `opponent` with `score` (1 win, 0 loss).
pub fn update(player: GlickoState, opponent: GlickoState, score: f64) -> GlickoState {
    let mu = to_mu(player.rating);
    let phi = to_phi(player.deviation);
    let mu_j = to_mu(opponent.rating);
    let phi_j = to_phi(opponent.deviation);

    let g_j = g(phi_j);
    let e_j = e(mu, mu_j, phi_j);
    let v = 1.0 / (g_j * g_j * e_j * (1.0 - e_j));
    let delta = v * g_j * (score - e_j);

    let sigma_prime = new_volatility(phi, player.volatility, v, delta);
    let phi_star = (phi * phi + sigma_prime * sigma_prime).sqrt();
    let phi_prime = 1.0 / (1.0 / (phi_star * phi_star) + 1.0 / v).sqrt();
    let mu_prime = mu + phi_prime * phi_prime * g_j * (score - e_j);

    GlickoState {
        rating: mu_prime * SCALE + BASE_RATING,
        deviation: (phi_prime * SCALE).min(MAX_DEVIATION),
        volatility: sigma_prime,
    }
}

/// Update both sides of a decided game.
pub fn rate_game(winner: GlickoState, loser: GlickoState) -> (GlickoState, GlickoState) {
    (update(winner, loser, 1.0), update(loser, winner, 0.0))
}
