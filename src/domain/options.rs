//! Simulation options handed to the policy engine
//!
//! Options arrive from observers as loosely-typed JSON. Nothing here ever
//! rejects input: each field is coerced or clamped into a valid value.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Upper bound for `maxDistanceFromLeader`
pub const MAX_DISTANCE_FROM_LEADER: u32 = 20;

/// Default for `maxDistanceFromLeader`
pub const DEFAULT_DISTANCE_FROM_LEADER: u32 = 2;

/// How members distribute attacks across targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AttackStyle {
    AoE,
    #[default]
    Focused,
    Balanced,
}

impl AttackStyle {
    /// Exact, case-sensitive match; anything else is `Focused`
    pub fn coerce(raw: Option<&Value>) -> Self {
        match raw.and_then(Value::as_str) {
            Some("AoE") => Self::AoE,
            Some("Focused") => Self::Focused,
            Some("Balanced") => Self::Balanced,
            other => {
                debug!(?other, "AttackStyle::coerce: unrecognized, using default");
                Self::default()
            }
        }
    }
}

/// Process-wide tunables for the policy engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationOptions {
    pub max_distance_from_leader: u32,
    pub follow_leader: bool,
    pub leader_follow_target: bool,
    pub attack_style: AttackStyle,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            max_distance_from_leader: DEFAULT_DISTANCE_FROM_LEADER,
            follow_leader: true,
            leader_follow_target: false,
            attack_style: AttackStyle::Focused,
        }
    }
}

impl SimulationOptions {
    /// Build a full options value from an arbitrary JSON body
    ///
    /// Missing fields are treated as absent, not as "keep previous": an update
    /// replaces the options wholesale.
    pub fn coerce(raw: &Value) -> Self {
        let options = Self {
            max_distance_from_leader: coerce_distance(raw.get("maxDistanceFromLeader")),
            follow_leader: truthy(raw.get("followLeader")),
            leader_follow_target: truthy(raw.get("leaderFollowTarget")),
            attack_style: AttackStyle::coerce(raw.get("attackStyle")),
        };
        debug!(?options, "SimulationOptions::coerce: result");
        options
    }
}

/// Numeric coercion for the distance field, clamped to `0..=MAX_DISTANCE_FROM_LEADER`
///
/// Numbers and numeric strings are accepted, booleans count as 0/1, null and the
/// empty string as 0. Anything non-numeric falls back to the default. Fractions
/// are truncated.
fn coerce_distance(raw: Option<&Value>) -> u32 {
    let number = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if s.trim().is_empty() => Some(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        Some(Value::Null) => Some(0.0),
        Some(Value::Array(_)) | Some(Value::Object(_)) | None => None,
    };

    match number {
        Some(n) if n.is_finite() => n.clamp(0.0, MAX_DISTANCE_FROM_LEADER as f64) as u32,
        Some(n) if n.is_infinite() => {
            if n > 0.0 {
                MAX_DISTANCE_FROM_LEADER
            } else {
                0
            }
        }
        _ => DEFAULT_DISTANCE_FROM_LEADER,
    }
}

/// JSON truthiness: absent, null, false, 0, and "" are false
fn truthy(raw: Option<&Value>) -> bool {
    match raw {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options = SimulationOptions::default();
        assert_eq!(options.max_distance_from_leader, 2);
        assert!(options.follow_leader);
        assert!(!options.leader_follow_target);
        assert_eq!(options.attack_style, AttackStyle::Focused);
    }

    #[test]
    fn test_out_of_range_distance_and_bogus_style() {
        let options = SimulationOptions::coerce(&json!({
            "maxDistanceFromLeader": 999,
            "followLeader": true,
            "leaderFollowTarget": true,
            "attackStyle": "bogus"
        }));

        assert_eq!(options.max_distance_from_leader, 20);
        assert_eq!(options.attack_style, AttackStyle::Focused);
        assert!(options.follow_leader);
        assert!(options.leader_follow_target);
    }

    #[test]
    fn test_negative_distance_clamps_to_zero() {
        let options = SimulationOptions::coerce(&json!({"maxDistanceFromLeader": -4}));
        assert_eq!(options.max_distance_from_leader, 0);
    }

    #[test]
    fn test_numeric_string_distance() {
        let options = SimulationOptions::coerce(&json!({"maxDistanceFromLeader": " 7 "}));
        assert_eq!(options.max_distance_from_leader, 7);
    }

    #[test]
    fn test_fractional_distance_truncates() {
        let options = SimulationOptions::coerce(&json!({"maxDistanceFromLeader": 3.9}));
        assert_eq!(options.max_distance_from_leader, 3);
    }

    #[test]
    fn test_non_numeric_distance_uses_default() {
        let options = SimulationOptions::coerce(&json!({"maxDistanceFromLeader": "far"}));
        assert_eq!(options.max_distance_from_leader, DEFAULT_DISTANCE_FROM_LEADER);

        let options = SimulationOptions::coerce(&json!({}));
        assert_eq!(options.max_distance_from_leader, DEFAULT_DISTANCE_FROM_LEADER);
    }

    #[test]
    fn test_missing_booleans_are_false() {
        let options = SimulationOptions::coerce(&json!({"attackStyle": "AoE"}));
        assert!(!options.follow_leader);
        assert!(!options.leader_follow_target);
        assert_eq!(options.attack_style, AttackStyle::AoE);
    }

    #[test]
    fn test_truthiness() {
        assert!(truthy(Some(&json!(1))));
        assert!(truthy(Some(&json!("no"))));
        assert!(truthy(Some(&json!({}))));
        assert!(!truthy(Some(&json!(0))));
        assert!(!truthy(Some(&json!(""))));
        assert!(!truthy(Some(&Value::Null)));
        assert!(!truthy(None));
    }

    #[test]
    fn test_attack_style_is_case_sensitive() {
        assert_eq!(AttackStyle::coerce(Some(&json!("Balanced"))), AttackStyle::Balanced);
        assert_eq!(AttackStyle::coerce(Some(&json!("balanced"))), AttackStyle::Focused);
        assert_eq!(AttackStyle::coerce(Some(&json!(3))), AttackStyle::Focused);
    }

    #[test]
    fn test_serialized_wire_names() {
        let json = serde_json::to_value(SimulationOptions::default()).unwrap();
        assert_eq!(
            json,
            json!({
                "maxDistanceFromLeader": 2,
                "followLeader": true,
                "leaderFollowTarget": false,
                "attackStyle": "Focused"
            })
        );
    }

    proptest! {
        #[test]
        fn prop_distance_always_in_range(distance in any::<i64>()) {
            let options = SimulationOptions::coerce(&json!({"maxDistanceFromLeader": distance}));
            prop_assert!(options.max_distance_from_leader <= MAX_DISTANCE_FROM_LEADER);
        }

        #[test]
        fn prop_float_distance_always_in_range(distance in any::<f64>()) {
            let raw = serde_json::Number::from_f64(distance).map(Value::Number).unwrap_or(Value::Null);
            let options = SimulationOptions::coerce(&json!({"maxDistanceFromLeader": raw}));
            prop_assert!(options.max_distance_from_leader <= MAX_DISTANCE_FROM_LEADER);
        }

        #[test]
        fn prop_any_style_string_is_valid(style in ".*") {
            let options = SimulationOptions::coerce(&json!({"attackStyle": style}));
            prop_assert!(matches!(
                options.attack_style,
                AttackStyle::AoE | AttackStyle::Focused | AttackStyle::Balanced
            ));
        }
    }
}
