//! Rule expressions: an AND/OR tree over leaf predicates.
//!
//! The scheduler never evaluates a rule. It validates the shape once before a run and then hands
//! the serialized tree to the oracle. Leaf parameters are carried as raw JSON.

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Leaf kinds the generator understands. `None` is the editor placeholder and is never valid.
pub const LEAF_KINDS: &[&str] = &[
    "Birth",
    "StarType",
    "BirthDistance",
    "XDistance",
    "Luminosity",
    "Spectr",
    "DysonRadius",
    "PlanetCount",
    "SatelliteCount",
    "TidalLockCount",
    "ThemeId",
    "GasCount",
    "OceanType",
    "GasRate",
    "AverageVeinAmount",
    "PlanetInDysonCount",
];

const PLACEHOLDER_KIND: &str = "None";

/// A single predicate: its kind plus whatever parameters that kind takes.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleLeaf {
    pub kind: String,
    pub params: Map<String, Value>,
}

/// Composable rule tree. Serializes to the generator's `{"type": ..}` tagged JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum RuleExpr {
    And(Vec<RuleExpr>),
    Or(Vec<RuleExpr>),
    /// Per-ruleset count gate: `rule` must match a number of stars satisfying `condition`.
    Composite {
        rule: Box<RuleExpr>,
        condition: Value,
    },
    CompositeAnd(Vec<RuleExpr>),
    CompositeOr(Vec<RuleExpr>),
    Leaf(RuleLeaf),
}

impl RuleExpr {
    /// Build a leaf from a kind and a JSON object of parameters (non-objects give no params).
    pub fn leaf(kind: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        RuleExpr::Leaf(RuleLeaf {
            kind: kind.into(),
            params,
        })
    }

    /// Editor layout: every inner group is OR'ed, the groups are AND'ed. Single-element groups
    /// collapse to their element.
    pub fn from_groups(groups: Vec<Vec<RuleExpr>>) -> Self {
        let mut ands: Vec<RuleExpr> = groups
            .into_iter()
            .map(|mut group| {
                if group.len() == 1 {
                    group.remove(0)
                } else {
                    RuleExpr::Or(group)
                }
            })
            .collect();
        if ands.len() == 1 {
            ands.remove(0)
        } else {
            RuleExpr::And(ands)
        }
    }

    /// Reject trees the oracle cannot evaluate: placeholder or unknown leaf kinds, empty groups.
    pub fn validate(&self) -> Result<()> {
        match self {
            RuleExpr::And(children)
            | RuleExpr::Or(children)
            | RuleExpr::CompositeAnd(children)
            | RuleExpr::CompositeOr(children) => {
                if children.is_empty() {
                    bail!("rule group '{}' has no children", self.kind());
                }
                children.iter().try_for_each(RuleExpr::validate)
            }
            RuleExpr::Composite { rule, condition } => {
                if !condition.is_object() {
                    bail!("composite rule is missing its condition");
                }
                rule.validate()
            }
            RuleExpr::Leaf(leaf) => {
                if leaf.kind == PLACEHOLDER_KIND {
                    bail!("rule contains an unset leaf");
                }
                if !LEAF_KINDS.contains(&leaf.kind.as_str()) {
                    bail!("unknown rule kind '{}'", leaf.kind);
                }
                Ok(())
            }
        }
    }

    /// The `type` tag this node serializes with.
    pub fn kind(&self) -> &str {
        match self {
            RuleExpr::And(_) => "And",
            RuleExpr::Or(_) => "Or",
            RuleExpr::Composite { .. } => "Composite",
            RuleExpr::CompositeAnd(_) => "CompositeAnd",
            RuleExpr::CompositeOr(_) => "CompositeOr",
            RuleExpr::Leaf(leaf) => &leaf.kind,
        }
    }

    /// Number of leaves in the tree.
    pub fn leaf_count(&self) -> usize {
        match self {
            RuleExpr::And(c)
            | RuleExpr::Or(c)
            | RuleExpr::CompositeAnd(c)
            | RuleExpr::CompositeOr(c) => c.iter().map(RuleExpr::leaf_count).sum(),
            RuleExpr::Composite { rule, .. } => rule.leaf_count(),
            RuleExpr::Leaf(_) => 1,
        }
    }
}

fn children_from(obj: &mut Map<String, Value>, kind: &str) -> Result<Vec<RuleExpr>> {
    match obj.remove("rules") {
        Some(Value::Array(items)) => items.into_iter().map(RuleExpr::try_from).collect(),
        Some(_) => Err(anyhow!("'{kind}' rules must be an array")),
        None => Err(anyhow!("'{kind}' is missing its rules")),
    }
}

fn group_value(kind: &str, children: Vec<RuleExpr>) -> Value {
    let mut obj = Map::new();
    obj.insert("type".into(), Value::String(kind.into()));
    obj.insert(
        "rules".into(),
        Value::Array(children.into_iter().map(Value::from).collect()),
    );
    Value::Object(obj)
}

impl TryFrom<Value> for RuleExpr {
    type Error = anyhow::Error;

    fn try_from(value: Value) -> Result<Self> {
        let Value::Object(mut obj) = value else {
            bail!("rule must be a JSON object");
        };
        let kind = match obj.remove("type") {
            Some(Value::String(s)) => s,
            _ => bail!("rule is missing its 'type'"),
        };
        let expr = match kind.as_str() {
            "And" => RuleExpr::And(children_from(&mut obj, &kind)?),
            "Or" => RuleExpr::Or(children_from(&mut obj, &kind)?),
            "CompositeAnd" => RuleExpr::CompositeAnd(children_from(&mut obj, &kind)?),
            "CompositeOr" => RuleExpr::CompositeOr(children_from(&mut obj, &kind)?),
            "Composite" => {
                let rule = obj
                    .remove("rule")
                    .ok_or_else(|| anyhow!("'Composite' is missing its rule"))?;
                RuleExpr::Composite {
                    rule: Box::new(RuleExpr::try_from(rule)?),
                    condition: obj.remove("condition").unwrap_or(Value::Null),
                }
            }
            _ => RuleExpr::Leaf(RuleLeaf { kind, params: obj }),
        };
        Ok(expr)
    }
}

impl From<RuleExpr> for Value {
    fn from(rule: RuleExpr) -> Self {
        match rule {
            RuleExpr::And(c) => group_value("And", c),
            RuleExpr::Or(c) => group_value("Or", c),
            RuleExpr::CompositeAnd(c) => group_value("CompositeAnd", c),
            RuleExpr::CompositeOr(c) => group_value("CompositeOr", c),
            RuleExpr::Composite { rule, condition } => {
                let mut obj = Map::new();
                obj.insert("type".into(), Value::String("Composite".into()));
                obj.insert("rule".into(), Value::from(*rule));
                obj.insert("condition".into(), condition);
                Value::Object(obj)
            }
            RuleExpr::Leaf(RuleLeaf { kind, params }) => {
                let mut obj = params;
                obj.insert("type".into(), Value::String(kind));
                Value::Object(obj)
            }
        }
    }
}
