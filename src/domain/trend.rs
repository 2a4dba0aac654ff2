// Trend direction classification relative to a goal
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrendState {
    #[default]
    Unknown,
    Flat,
    FlatAtGoal,
    Up15,
    Down15,
    Up15Good,
    Up30Good,
    Up45Good,
    Up15Bad,
    Up30Bad,
    Up45Bad,
    Down15Good,
    Down30Good,
    Down45Good,
    Down15Bad,
    Down30Bad,
    Down45Bad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Magnitude {
    Slight,
    Moderate,
    Steep,
}

impl TrendState {
    /// Classifies the move from `old` to `new`.
    ///
    /// `spread` is the sensitivity-scaled standard deviation. Movement below
    /// half of it is a 15 degree change, below all of it 30, otherwise 45.
    /// Being within a quarter of it counts as at the goal.
    pub fn classify(old: f64, new: f64, goal: f64, spread: f64) -> TrendState {
        if old.is_nan() || new.is_nan() || goal.is_nan() || spread.is_nan() {
            return TrendState::Unknown;
        }

        let quarter = spread / 4.0;
        let half = spread / 2.0;

        if old == new {
            return if (new - goal).abs() <= quarter {
                TrendState::FlatAtGoal
            } else {
                TrendState::Flat
            };
        }

        if spread <= 0.0 {
            return TrendState::Unknown;
        }

        let rising = new > old;
        if (old < goal && new > goal) || (old > goal && new < goal) {
            return if rising {
                TrendState::Up15
            } else {
                TrendState::Down15
            };
        }

        let delta = (new - old).abs();
        let magnitude = if delta < half {
            Magnitude::Slight
        } else if delta < spread {
            Magnitude::Moderate
        } else {
            Magnitude::Steep
        };
        let toward_goal = if rising { old < goal } else { old > goal };

        match (rising, toward_goal, magnitude) {
            (true, true, Magnitude::Slight) => TrendState::Up15Good,
            (true, true, Magnitude::Moderate) => TrendState::Up30Good,
            (true, true, Magnitude::Steep) => TrendState::Up45Good,
            (true, false, Magnitude::Slight) => TrendState::Up15Bad,
            (true, false, Magnitude::Moderate) => TrendState::Up30Bad,
            (true, false, Magnitude::Steep) => TrendState::Up45Bad,
            (false, true, Magnitude::Slight) => TrendState::Down15Good,
            (false, true, Magnitude::Moderate) => TrendState::Down30Good,
            (false, true, Magnitude::Steep) => TrendState::Down45Good,
            (false, false, Magnitude::Slight) => TrendState::Down15Bad,
            (false, false, Magnitude::Moderate) => TrendState::Down30Bad,
            (false, false, Magnitude::Steep) => TrendState::Down45Bad,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TrendState::Unknown => "unknown",
            TrendState::Flat => "flat",
            TrendState::FlatAtGoal => "flat_at_goal",
            TrendState::Up15 => "up_15",
            TrendState::Down15 => "down_15",
            TrendState::Up15Good => "up_15_good",
            TrendState::Up30Good => "up_30_good",
            TrendState::Up45Good => "up_45_good",
            TrendState::Up15Bad => "up_15_bad",
            TrendState::Up30Bad => "up_30_bad",
            TrendState::Up45Bad => "up_45_bad",
            TrendState::Down15Good => "down_15_good",
            TrendState::Down30Good => "down_30_good",
            TrendState::Down45Good => "down_45_good",
            TrendState::Down15Bad => "down_15_bad",
            TrendState::Down30Bad => "down_30_bad",
            TrendState::Down45Bad => "down_45_bad",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_states() {
        assert_eq!(TrendState::classify(5.0, 5.0, 5.0, 2.0), TrendState::FlatAtGoal);
        assert_eq!(TrendState::classify(5.0, 5.0, 5.0, 0.0), TrendState::FlatAtGoal);
        assert_eq!(TrendState::classify(9.0, 9.0, 5.0, 2.0), TrendState::Flat);
        assert_eq!(TrendState::classify(5.4, 5.4, 5.0, 2.0), TrendState::FlatAtGoal);
    }

    #[test]
    fn test_direction_relative_to_goal() {
        // Goal above: rising is good.
        assert_eq!(TrendState::classify(1.0, 1.5, 10.0, 4.0), TrendState::Up15Good);
        assert_eq!(TrendState::classify(1.0, 4.0, 10.0, 4.0), TrendState::Up30Good);
        assert_eq!(TrendState::classify(1.0, 6.0, 10.0, 4.0), TrendState::Up45Good);
        assert_eq!(TrendState::classify(6.0, 1.0, 10.0, 4.0), TrendState::Down45Bad);

        // Goal below: falling is good.
        assert_eq!(TrendState::classify(20.0, 19.0, 10.0, 4.0), TrendState::Down15Good);
        assert_eq!(TrendState::classify(19.0, 22.0, 10.0, 4.0), TrendState::Up30Bad);
    }

    #[test]
    fn test_goal_crossing_is_plain() {
        assert_eq!(TrendState::classify(9.0, 11.0, 10.0, 4.0), TrendState::Up15);
        assert_eq!(TrendState::classify(11.0, 9.0, 10.0, 4.0), TrendState::Down15);
    }

    #[test]
    fn test_unknown() {
        assert_eq!(TrendState::classify(f64::NAN, 1.0, 0.0, 1.0), TrendState::Unknown);
        assert_eq!(TrendState::classify(1.0, 2.0, 0.0, 0.0), TrendState::Unknown);
        assert_eq!(TrendState::Unknown.name(), "unknown");
        assert_eq!(TrendState::Down30Good.name(), "down_30_good");
    }
}
