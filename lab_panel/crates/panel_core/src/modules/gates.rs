use crate::modules::error::LabError;
use crate::modules::protocol::GateType;
use serde::{Deserialize, Serialize};

/// Outputs for the input pairs (0,0), (0,1), (1,0), (1,1), in that order.
pub fn truth_table(gate: GateType) -> [bool; 4] {
    match gate {
        GateType::And => [false, false, false, true],
        GateType::Or => [false, true, true, true],
        // NOT only looks at input A; each A row is duplicated across B.
        GateType::Not => [true, true, false, false],
        GateType::Nand => [true, true, true, false],
        GateType::Nor => [true, false, false, false],
        GateType::Xor => [false, true, true, false],
    }
}

pub fn evaluate(gate: GateType, input_a: bool, input_b: bool) -> bool {
    truth_table(gate)[row_index(input_a, input_b)]
}

pub fn row_index(input_a: bool, input_b: bool) -> usize {
    2 * usize::from(input_a) + usize::from(input_b)
}

pub fn parse_gate(name: &str) -> Result<GateType, LabError> {
    let wanted = name.trim();
    GateType::ALL
        .into_iter()
        .find(|g| g.as_str().eq_ignore_ascii_case(wanted))
        .ok_or_else(|| LabError::UnknownGateType(name.to_string()))
}

pub fn truth_table_named(name: &str) -> Result<[bool; 4], LabError> {
    parse_gate(name).map(truth_table)
}

pub fn evaluate_named(name: &str, input_a: bool, input_b: bool) -> Result<bool, LabError> {
    parse_gate(name).map(|g| evaluate(g, input_a, input_b))
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSelection {
    pub gate_type: GateType,
    pub input_a: bool,
    pub input_b: bool,
}

impl GateSelection {
    pub fn new(gate_type: GateType, input_a: bool, input_b: bool) -> Self {
        Self {
            gate_type,
            input_a,
            input_b,
        }
    }

    pub fn output(&self) -> bool {
        evaluate(self.gate_type, self.input_a, self.input_b)
    }

    pub fn truth_table(&self) -> [bool; 4] {
        truth_table(self.gate_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(table: [bool; 4]) -> [u8; 4] {
        table.map(u8::from)
    }

    #[test]
    fn tables_match_reference() {
        assert_eq!(bits(truth_table(GateType::And)), [0, 0, 0, 1]);
        assert_eq!(bits(truth_table(GateType::Or)), [0, 1, 1, 1]);
        assert_eq!(bits(truth_table(GateType::Not)), [1, 1, 0, 0]);
        assert_eq!(bits(truth_table(GateType::Nand)), [1, 1, 1, 0]);
        assert_eq!(bits(truth_table(GateType::Nor)), [1, 0, 0, 0]);
        assert_eq!(bits(truth_table(GateType::Xor)), [0, 1, 1, 0]);
    }

    #[test]
    fn evaluate_agrees_with_table() {
        for gate in GateType::ALL {
            let table = truth_table(gate);
            for (a, b) in [(false, false), (false, true), (true, false), (true, true)] {
                let idx = 2 * usize::from(a) + usize::from(b);
                assert_eq!(evaluate(gate, a, b), table[idx], "{gate:?} ({a}, {b})");
            }
        }
    }

    #[test]
    fn literal_spot_checks() {
        assert!(!evaluate(GateType::And, false, false));
        assert!(evaluate(GateType::And, true, true));
        assert!(evaluate(GateType::Xor, true, false));
        assert!(!evaluate(GateType::Nand, true, true));
        assert!(evaluate(GateType::Nor, false, false));
        assert!(!evaluate(GateType::Not, true, false));
        assert!(!evaluate(GateType::Not, true, true));
    }

    #[test]
    fn unknown_gate_is_an_error() {
        assert!(matches!(
            truth_table_named("XNOR"),
            Err(LabError::UnknownGateType(name)) if name == "XNOR"
        ));
        assert!(matches!(
            evaluate_named("", true, true),
            Err(LabError::UnknownGateType(_))
        ));
        assert_eq!(parse_gate("nand").unwrap(), GateType::Nand);
    }
}
