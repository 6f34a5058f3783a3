//! Budget gating and score tracking
//!
//! The core edit API only sees the `Budget` capability; this module ships
//! the concrete implementation the binary wires in when the simulation is
//! played as a game.

/// Injected capability for affording, spending and refunding edit costs.
pub trait Budget {
    fn can_afford(&self, cost: i32) -> bool;
    fn spend(&mut self, cost: i32) -> bool;
    fn refund(&mut self, amount: i32);
}

/// A budget that never refuses, for headless simulations.
#[derive(Debug, Default, Clone, Copy)]
pub struct FreeBudget;

impl Budget for FreeBudget {
    fn can_afford(&self, _cost: i32) -> bool {
        true
    }

    fn spend(&mut self, _cost: i32) -> bool {
        true
    }

    fn refund(&mut self, _amount: i32) {}
}

/// Edit costs for the game
pub const COST_LINK: i32 = 10;
pub const COST_HIGHWAY: i32 = 250;
pub const COST_HOUSE: i32 = 200;
pub const COST_BUSINESS: i32 = 400;
pub const COST_STATION: i32 = 300;

/// Revenue per completed delivery
pub const REVENUE_DELIVERY: i32 = 50;

/// Starting budget for the player
pub const STARTING_BUDGET: i32 = 2000;

/// Win thresholds
pub const GOAL_DELIVERIES: usize = 50;
pub const GOAL_MONEY: i32 = 5000;

/// Game state that tracks player progress and resources
#[derive(Debug, Clone)]
pub struct GameState {
    /// Player's current money
    pub money: i32,

    /// Total deliveries completed (house -> business -> house)
    pub deliveries_completed: usize,

    /// Game time in seconds
    pub time: f32,

    /// Whether the game is won
    pub is_won: bool,

    /// Whether the game is lost (bankrupt)
    pub is_lost: bool,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState {
    pub fn new() -> Self {
        Self {
            money: STARTING_BUDGET,
            deliveries_completed: 0,
            time: 0.0,
            is_won: false,
            is_lost: false,
        }
    }

    pub fn earn(&mut self, amount: i32) {
        self.money += amount;
    }

    /// Record a delivery completion and award revenue
    pub fn complete_delivery(&mut self) {
        self.deliveries_completed += 1;
        self.earn(REVENUE_DELIVERY);
    }

    /// Update game time and check win/loss conditions
    pub fn update(&mut self, delta_secs: f32) {
        self.time += delta_secs;

        if self.deliveries_completed >= GOAL_DELIVERIES || self.money >= GOAL_MONEY {
            self.is_won = true;
        }

        if self.money < 0 {
            self.is_lost = true;
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Money: ${} | Deliveries: {} | Time: {:.1}s",
            self.money, self.deliveries_completed, self.time
        )
    }
}

impl Budget for GameState {
    fn can_afford(&self, cost: i32) -> bool {
        self.money >= cost
    }

    fn spend(&mut self, cost: i32) -> bool {
        if self.can_afford(cost) {
            self.money -= cost;
            true
        } else {
            false
        }
    }

    fn refund(&mut self, amount: i32) {
        self.money += amount;
    }
}
