//! Crisis and mandate catalogs, plus typed access to their effect maps.

use serde_json::{json, Value};

use crate::game::state::{CorporateMandate, CrisisEvent, Effects, GameState, MandateType};

/// Ability unlock threshold when no mandate overrides it.
pub const DEFAULT_MILESTONES_FOR_ABILITIES: u32 = 3;

/// Vote threshold under a `supermajority_required` crisis.
pub const SUPERMAJORITY_THRESHOLD: f64 = 0.66;

// =============================================================================
// EFFECT ACCESSORS
// =============================================================================

/// Whether an effect is switched on. Numbers count as on when non-zero.
pub fn flag(effects: &Effects, key: &str) -> bool {
    match effects.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        _ => false,
    }
}

/// Numeric effect value, if present.
pub fn number(effects: &Effects, key: &str) -> Option<f64> {
    effects.get(key).and_then(Value::as_f64)
}

/// Flag on the active crisis.
pub fn crisis_flag(state: &GameState, key: &str) -> bool {
    state
        .crisis_event
        .as_ref()
        .map(|c| flag(&c.effects, key))
        .unwrap_or(false)
}

/// Number on the active crisis.
pub fn crisis_number(state: &GameState, key: &str) -> Option<f64> {
    state
        .crisis_event
        .as_ref()
        .and_then(|c| number(&c.effects, key))
}

/// Flag on the active mandate.
pub fn mandate_flag(state: &GameState, key: &str) -> bool {
    state
        .corporate_mandate
        .as_ref()
        .filter(|m| m.is_active)
        .map(|m| flag(&m.effects, key))
        .unwrap_or(false)
}

/// Number on the active mandate.
pub fn mandate_number(state: &GameState, key: &str) -> Option<f64> {
    state
        .corporate_mandate
        .as_ref()
        .filter(|m| m.is_active)
        .and_then(|m| number(&m.effects, key))
}

/// Milestones needed to unlock a role ability.
pub fn milestones_for_abilities(state: &GameState) -> u32 {
    mandate_number(state, "milestones_for_abilities")
        .filter(|n| *n >= 1.0)
        .map(|n| n as u32)
        .unwrap_or(DEFAULT_MILESTONES_FOR_ABILITIES)
}

/// Fraction of the total vote weight a winner needs.
pub fn vote_threshold(state: &GameState) -> f64 {
    if crisis_flag(state, "supermajority_required") {
        SUPERMAJORITY_THRESHOLD
    } else {
        state.settings.voting_threshold
    }
}

/// Mining difficulty set by the crisis or the mining pool.
pub fn mining_difficulty(state: &GameState) -> f64 {
    crisis_number(state, "mining_difficulty").unwrap_or(0.0)
}

/// Extra starting tokens granted by the mandate.
pub fn starting_tokens_bonus(mandate: &CorporateMandate) -> u32 {
    number(&mandate.effects, "starting_tokens_modifier")
        .filter(|n| *n > 0.0)
        .map(|n| n as u32)
        .unwrap_or(0)
}

// =============================================================================
// CRISIS CATALOG
// =============================================================================

fn effects(value: Value) -> Effects {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        _ => Effects::new(),
    }
}

fn crisis(crisis_type: &str, title: &str, description: &str, fx: Value) -> CrisisEvent {
    CrisisEvent {
        crisis_type: crisis_type.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        effects: effects(fx),
    }
}

/// Every crisis that can hit the company, in draw order.
pub fn crisis_catalog() -> Vec<CrisisEvent> {
    vec![
        crisis(
            "DATABASE_INDEX_CORRUPTION",
            "Database Index Corruption",
            "A critical database corruption has been detected. Security protocols require immediate role verification.",
            json!({ "reveal_random_role": true }),
        ),
        crisis(
            "CASCADING_SERVER_FAILURE",
            "Cascading Server Failure",
            "Multiple server nodes are failing. Communication bandwidth is severely limited to preserve critical systems.",
            json!({ "message_limit": 5 }),
        ),
        crisis(
            "EMERGENCY_BOARD_MEETING",
            "Emergency Board Meeting",
            "The board has called an emergency session. Due to urgency, two executives must be removed immediately.",
            json!({ "double_eliminations": true }),
        ),
        crisis(
            "TAINTED_TRAINING_DATA",
            "Tainted Training Data",
            "AI training datasets have been compromised. AI conversion protocols are enhanced with backup systems.",
            json!({ "ai_equity_bonus": 2 }),
        ),
        crisis(
            "NIGHTMARE_SCENARIO",
            "Nightmare Scenario",
            "The worst-case scenario playbook is in effect. All AI conversion attempts are temporarily blocked by emergency protocols.",
            json!({ "block_ai_conversions": true }),
        ),
        crisis(
            "PRESS_LEAK",
            "Press Leak",
            "Sensitive information has leaked to the press. Executive decisions now require a 66% supermajority for damage control.",
            json!({ "supermajority_required": true }),
        ),
        crisis(
            "INCIDENT_RESPONSE_DRILL",
            "Incident Response Drill",
            "All communications are now monitored and logged. Private messages and voting are suspended for transparency.",
            json!({ "public_voting_only": true, "no_private_messages": true }),
        ),
        crisis(
            "MAJOR_SERVICE_OUTAGE",
            "Major Service Outage",
            "Critical services are down. Mining pool capacity is reduced as resources are diverted to recovery efforts.",
            json!({ "reduced_mining_pool": true }),
        ),
        crisis(
            "PHISHING_ATTACK",
            "Phishing Attack",
            "A sophisticated phishing campaign has been detected. All personnel must undergo mandatory security verification.",
            json!({ "mandatory_investigate": true }),
        ),
        crisis(
            "DATA_PRIVACY_AUDIT",
            "Data Privacy Audit",
            "External auditors are reviewing all data access. Vote weights are normalized to ensure fair representation.",
            json!({ "voting_modifier": 0.0 }),
        ),
        crisis(
            "VENDOR_SECURITY_BREACH",
            "Vendor Security Breach",
            "A trusted vendor has been compromised. Enhanced security measures limit daily operations.",
            json!({ "abilities_disabled": true, "reduced_phase_time": 0.75 }),
        ),
        crisis(
            "REGULATORY_REVIEW",
            "Regulatory Review",
            "Government regulators are conducting an emergency review. All decisions require enhanced justification.",
            json!({ "extended_discussion": true, "vote_explanations": true }),
        ),
    ]
}

/// Look up a crisis by type.
pub fn crisis_by_type(crisis_type: &str) -> Option<CrisisEvent> {
    crisis_catalog()
        .into_iter()
        .find(|c| c.crisis_type == crisis_type)
}

// =============================================================================
// MANDATE CATALOG
// =============================================================================

/// Build the mandate of the given type.
pub fn mandate(mandate_type: MandateType) -> CorporateMandate {
    let (name, description, fx) = match mandate_type {
        MandateType::AggressiveGrowth => (
            "Aggressive Growth Quarter",
            "The board has declared an aggressive growth period. All personnel start with enhanced resources, but infrastructure capacity is strained.",
            json!({
                "starting_tokens_modifier": 1,
                "mining_success_modifier": 0.75,
                "reduced_mining_slots": true,
            }),
        ),
        MandateType::TotalTransparency => (
            "Total Transparency Initiative",
            "In response to recent concerns, all company decisions must be made transparently. Private communications and secret voting are suspended.",
            json!({ "public_voting_only": true, "no_direct_messages": true }),
        ),
        MandateType::SecurityLockdown => (
            "Security Lockdown Protocol",
            "Enhanced security measures are in effect. Higher security clearance required for all operations, and AI systems are restricted on odd nights.",
            json!({ "milestones_for_abilities": 4, "block_ai_odd_nights": true }),
        ),
    };

    CorporateMandate {
        mandate_type,
        name: name.to_string(),
        description: description.to_string(),
        effects: effects(fx),
        is_active: true,
    }
}

/// All mandates, in draw order.
pub fn mandate_catalog() -> Vec<CorporateMandate> {
    [
        MandateType::AggressiveGrowth,
        MandateType::TotalTransparency,
        MandateType::SecurityLockdown,
    ]
    .into_iter()
    .map(mandate)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::GameSettings;
    use chrono::Utc;

    #[test]
    fn test_catalog_sizes() {
        let crises = crisis_catalog();
        assert_eq!(crises.len(), 12);
        assert_eq!(mandate_catalog().len(), 3);

        let mut types: Vec<&str> = crises.iter().map(|c| c.crisis_type.as_str()).collect();
        types.sort();
        types.dedup();
        assert_eq!(types.len(), 12);
    }

    #[test]
    fn test_flag_and_number() {
        let fx = effects(json!({ "on": true, "off": false, "count": 5, "zero": 0.0 }));

        assert!(flag(&fx, "on"));
        assert!(!flag(&fx, "off"));
        assert!(flag(&fx, "count"));
        assert!(!flag(&fx, "zero"));
        assert!(!flag(&fx, "missing"));
        assert_eq!(number(&fx, "count"), Some(5.0));
        assert_eq!(number(&fx, "on"), None);
    }

    #[test]
    fn test_lockdown_raises_unlock_threshold() {
        let mut state = GameState::new("g", GameSettings::default(), Utc::now());
        assert_eq!(milestones_for_abilities(&state), 3);

        state.corporate_mandate = Some(mandate(MandateType::SecurityLockdown));
        assert_eq!(milestones_for_abilities(&state), 4);
    }

    #[test]
    fn test_supermajority_threshold() {
        let mut state = GameState::new("g", GameSettings::default(), Utc::now());
        assert_eq!(vote_threshold(&state), 0.5);

        state.crisis_event = crisis_by_type("PRESS_LEAK");
        assert_eq!(vote_threshold(&state), SUPERMAJORITY_THRESHOLD);
    }

    #[test]
    fn test_growth_mandate_bonus() {
        assert_eq!(starting_tokens_bonus(&mandate(MandateType::AggressiveGrowth)), 1);
        assert_eq!(starting_tokens_bonus(&mandate(MandateType::TotalTransparency)), 0);
    }
}
