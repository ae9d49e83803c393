//! Rank-1 constraint system description
//!
//! Circuit compilation is done elsewhere; this module only models what the
//! derivation passes consume: linear-combination triples `(L, R, O)` per
//! constraint, a coefficient table, the public/secret/internal wire split, and
//! the commitment declarations.
//!
//! Wires are numbered public first (wire 0 is the constant one), then secret,
//! then internal.
//!
//! A JSON form is accepted for the CLI:
//!
//! ```json
//! {
//!   "nb_public": 1, "nb_secret": 2, "nb_internal": 3,
//!   "coefficients": ["5"],
//!   "constraints": [
//!     { "l": [{ "wire": 1, "coeff": "one" }],
//!       "r": [{ "wire": 2, "coeff": { "table": 0 } }],
//!       "o": [{ "wire": 3, "coeff": "minus_one" }] }
//!   ],
//!   "commitments": [{ "commitment_wire": 5, "private_committed": [1] }]
//! }
//! ```

#![forbid(unsafe_code)]

use ark_ff::{One, Zero};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::str::FromStr;

use crate::{SetupError, F};

/// Coefficient of a linear-combination term.
///
/// The four small constants are dispatched without a scalar multiplication;
/// everything else indexes the per-circuit coefficient table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coefficient {
    /// 0 (term contributes nothing).
    Zero,
    /// 1.
    One,
    /// −1.
    MinusOne,
    /// 2.
    Two,
    /// `coefficients[index]`.
    Table(usize),
}

impl Coefficient {
    /// Resolve to a field element.
    pub fn value(self, table: &[F]) -> Option<F> {
        match self {
            Coefficient::Zero => Some(F::zero()),
            Coefficient::One => Some(F::one()),
            Coefficient::MinusOne => Some(-F::one()),
            Coefficient::Two => Some(F::from(2u64)),
            Coefficient::Table(i) => table.get(i).copied(),
        }
    }
}

/// One term of a linear expression: `coeff · wire`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    /// Wire index.
    pub wire: usize,
    /// Coefficient tag.
    pub coeff: Coefficient,
}

impl Term {
    /// Convenience constructor.
    pub fn new(wire: usize, coeff: Coefficient) -> Self {
        Self { wire, coeff }
    }
}

/// A rank-1 constraint `L · R = O`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct R1C {
    /// Left linear expression.
    #[serde(default)]
    pub l: Vec<Term>,
    /// Right linear expression.
    #[serde(default)]
    pub r: Vec<Term>,
    /// Output linear expression.
    #[serde(default)]
    pub o: Vec<Term>,
}

/// One declared commitment.
///
/// `commitment_wire` carries the commitment value itself (a hint output the
/// verifier injects, hence treated as public); `private_committed` lists the
/// private wires folded into it, in ascending order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentInfo {
    /// Wire holding the commitment output.
    pub commitment_wire: usize,
    /// Private wires committed to, sorted ascending.
    #[serde(default)]
    pub private_committed: Vec<usize>,
}

/// Constraint system consumed by the derivation passes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConstraintSystem {
    /// Public variables, including the constant-one wire.
    pub nb_public: usize,
    /// Secret (private input) variables.
    pub nb_secret: usize,
    /// Internal variables.
    pub nb_internal: usize,
    /// Coefficient table indexed by [`Coefficient::Table`].
    pub coefficients: Vec<F>,
    /// Constraints in evaluation order.
    pub constraints: Vec<R1C>,
    /// Declared commitments, in declaration order.
    pub commitments: Vec<CommitmentInfo>,
}

impl ConstraintSystem {
    /// Total number of wires.
    pub fn nb_wires(&self) -> usize {
        self.nb_public + self.nb_secret + self.nb_internal
    }

    /// Number of constraints.
    pub fn nb_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Resolve a term's coefficient, failing on a dangling table index.
    pub fn coefficient(&self, coeff: Coefficient) -> Result<F, SetupError> {
        coeff.value(&self.coefficients).ok_or_else(|| {
            SetupError::InvalidCircuit(format!(
                "coefficient index {coeff:?} out of range (table has {})",
                self.coefficients.len()
            ))
        })
    }

    /// Wire indices of the commitment outputs, ascending.
    pub fn commitment_wires(&self) -> Vec<usize> {
        let mut wires: Vec<usize> = self.commitments.iter().map(|c| c.commitment_wire).collect();
        wires.sort_unstable();
        wires
    }

    /// Total number of privately committed wires over all commitments.
    pub fn nb_private_committed(&self) -> usize {
        self.commitments.iter().map(|c| c.private_committed.len()).sum()
    }

    /// Check wire and coefficient indices and commitment list ordering.
    ///
    /// Every private wire plays at most one commitment role: an output wire,
    /// or a member of exactly one private-committed list.
    pub fn validate(&self) -> Result<(), SetupError> {
        let nb_wires = self.nb_wires();
        if self.nb_public == 0 {
            return Err(SetupError::InvalidCircuit("missing the constant-one public wire".into()));
        }
        for (i, c) in self.constraints.iter().enumerate() {
            for t in c.l.iter().chain(&c.r).chain(&c.o) {
                if t.wire >= nb_wires {
                    return Err(SetupError::InvalidCircuit(format!(
                        "constraint {i} references wire {} but the circuit has {nb_wires} wires",
                        t.wire
                    )));
                }
                self.coefficient(t.coeff)?;
            }
        }
        for (j, c) in self.commitments.iter().enumerate() {
            if c.commitment_wire < self.nb_public || c.commitment_wire >= nb_wires {
                return Err(SetupError::InvalidCircuit(format!(
                    "commitment {j} output wire {} is not a private wire",
                    c.commitment_wire
                )));
            }
            if !c.private_committed.windows(2).all(|w| w[0] < w[1]) {
                return Err(SetupError::InvalidCircuit(format!(
                    "commitment {j} private wire list is not strictly ascending"
                )));
            }
            if let Some(&w) = c
                .private_committed
                .iter()
                .find(|&&w| w < self.nb_public || w >= nb_wires)
            {
                return Err(SetupError::InvalidCircuit(format!(
                    "commitment {j} commits to wire {w}, which is not a private wire"
                )));
            }
        }

        let mut role = vec![None::<usize>; nb_wires];
        for (j, c) in self.commitments.iter().enumerate() {
            for &w in std::iter::once(&c.commitment_wire).chain(&c.private_committed) {
                if let Some(prev) = role[w].replace(j) {
                    return Err(SetupError::InvalidCircuit(format!(
                        "wire {w} is claimed by commitment {prev} and commitment {j}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Parse the JSON form and validate it.
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self, SetupError> {
        let raw: RawConstraintSystem = serde_json::from_reader(reader)
            .map_err(|e| SetupError::InvalidCircuit(format!("constraint system JSON: {e}")))?;
        let coefficients = raw
            .coefficients
            .iter()
            .enumerate()
            .map(|(i, s)| {
                F::from_str(s).map_err(|_| {
                    SetupError::InvalidCircuit(format!("coefficient {i} is not a decimal field element: {s:?}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let cs = ConstraintSystem {
            nb_public: raw.nb_public,
            nb_secret: raw.nb_secret,
            nb_internal: raw.nb_internal,
            coefficients,
            constraints: raw.constraints,
            commitments: raw.commitments,
        };
        cs.validate()?;
        Ok(cs)
    }
}

#[derive(Deserialize)]
struct RawConstraintSystem {
    nb_public: usize,
    #[serde(default)]
    nb_secret: usize,
    #[serde(default)]
    nb_internal: usize,
    #[serde(default)]
    coefficients: Vec<String>,
    #[serde(default)]
    constraints: Vec<R1C>,
    #[serde(default)]
    commitments: Vec<CommitmentInfo>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Four constraints over six wires: one public, two secret, three internal.
    /// Commitment output on wire 5 folds in secret wire 1.
    pub(crate) fn toy_circuit() -> ConstraintSystem {
        use Coefficient::*;
        ConstraintSystem {
            nb_public: 1,
            nb_secret: 2,
            nb_internal: 3,
            coefficients: vec![F::from(5u64)],
            constraints: vec![
                R1C { l: vec![Term::new(1, One)], r: vec![Term::new(2, One)], o: vec![Term::new(3, One)] },
                R1C {
                    l: vec![Term::new(3, Two), Term::new(0, MinusOne)],
                    r: vec![Term::new(0, One)],
                    o: vec![Term::new(4, Table(0))],
                },
                R1C { l: vec![Term::new(4, One)], r: vec![Term::new(1, Zero)], o: vec![Term::new(2, MinusOne)] },
                R1C { l: vec![Term::new(5, One)], r: vec![Term::new(0, One)], o: vec![Term::new(5, One)] },
            ],
            commitments: vec![CommitmentInfo { commitment_wire: 5, private_committed: vec![1] }],
        }
    }

    #[test]
    fn toy_circuit_is_valid() {
        let cs = toy_circuit();
        cs.validate().unwrap();
        assert_eq!(cs.nb_wires(), 6);
        assert_eq!(cs.nb_constraints(), 4);
        assert_eq!(cs.commitment_wires(), vec![5]);
        assert_eq!(cs.nb_private_committed(), 1);
    }

    #[test]
    fn dangling_wire_is_rejected() {
        let mut cs = toy_circuit();
        cs.constraints[0].o.push(Term::new(6, Coefficient::One));
        assert!(matches!(cs.validate(), Err(SetupError::InvalidCircuit(_))));
    }

    #[test]
    fn dangling_coefficient_is_rejected() {
        let mut cs = toy_circuit();
        cs.constraints[0].o.push(Term::new(1, Coefficient::Table(3)));
        assert!(cs.validate().unwrap_err().to_string().contains("out of range"));
    }

    #[test]
    fn overlapping_commitment_roles_are_rejected() {
        // two commitments sharing an output wire
        let mut cs = toy_circuit();
        cs.commitments.push(CommitmentInfo { commitment_wire: 5, private_committed: vec![2] });
        assert!(matches!(cs.validate(), Err(SetupError::InvalidCircuit(_))));

        // output wire of one commitment committed by another
        let mut cs = toy_circuit();
        cs.commitments.push(CommitmentInfo { commitment_wire: 4, private_committed: vec![5] });
        let err = cs.validate().unwrap_err();
        assert!(err.to_string().contains("wire 5 is claimed by commitment 0 and commitment 1"), "{err}");

        // output wire inside its own committed list
        let mut cs = toy_circuit();
        cs.commitments[0].private_committed = vec![1, 5];
        assert!(matches!(cs.validate(), Err(SetupError::InvalidCircuit(_))));

        // one wire in two committed lists
        let mut cs = toy_circuit();
        cs.commitments.push(CommitmentInfo { commitment_wire: 4, private_committed: vec![1] });
        assert!(matches!(cs.validate(), Err(SetupError::InvalidCircuit(_))));

        // disjoint roles stay valid
        let mut cs = toy_circuit();
        cs.commitments.push(CommitmentInfo { commitment_wire: 4, private_committed: vec![2] });
        cs.validate().unwrap();
    }

    #[test]
    fn json_form_parses() {
        let json = r#"{
            "nb_public": 1, "nb_secret": 2, "nb_internal": 3,
            "coefficients": ["5"],
            "constraints": [
                { "l": [{ "wire": 1, "coeff": "one" }],
                  "r": [{ "wire": 2, "coeff": { "table": 0 } }],
                  "o": [{ "wire": 3, "coeff": "minus_one" }] }
            ],
            "commitments": [{ "commitment_wire": 5, "private_committed": [1] }]
        }"#;
        let cs = ConstraintSystem::from_json_reader(json.as_bytes()).unwrap();
        assert_eq!(cs.coefficients, vec![F::from(5u64)]);
        assert_eq!(cs.constraints[0].r[0].coeff, Coefficient::Table(0));
        assert_eq!(cs.constraints[0].o[0].coeff, Coefficient::MinusOne);
        assert_eq!(cs.commitments[0].commitment_wire, 5);
    }

    #[test]
    fn coefficient_values() {
        let table = [F::from(9u64)];
        assert_eq!(Coefficient::MinusOne.value(&table), Some(-F::one()));
        assert_eq!(Coefficient::Two.value(&table), Some(F::from(2u64)));
        assert_eq!(Coefficient::Table(0).value(&table), Some(F::from(9u64)));
        assert_eq!(Coefficient::Table(1).value(&table), None);
    }
}
