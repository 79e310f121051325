use std::collections::BTreeMap;

use rhai::{Dynamic, Map};
use serde::{Deserialize, Serialize};

/// Declared animation parameter. The outer schema key is a group name; the
/// inner key is the parameter name. Only the defaults are needed to run an
/// animation; the full declaration (bounds, options) is consumed by the
/// design-time editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParamDecl {
    Float {
        default: f64,
        min: f64,
        max: f64,
    },
    Int {
        default: i64,
        min: i64,
        max: i64,
    },
    /// Two independent real axes.
    Pair {
        default: [f64; 2],
        min: [f64; 2],
        max: [f64; 2],
    },
    /// Three reals in `[0, 1]`.
    Color { default: [f64; 3] },
    /// Ordered option list; the default is an option index.
    Enum {
        options: Vec<String>,
        default: usize,
    },
    /// Bitset over a named ordered flag list; the default names the set flags.
    Flags {
        flags: Vec<String>,
        default: Vec<String>,
    },
}

pub type ParamSchema = BTreeMap<String, BTreeMap<String, ParamDecl>>;

/// Flatten a schema into the parameter map handed to `color()` on every
/// evaluation: parameter name to declared default. Enum defaults flatten to
/// the selected option string, flag sets to the array of enabled flag names.
pub fn flatten_defaults(schema: &ParamSchema) -> Map {
    let mut out = Map::new();
    for group in schema.values() {
        for (name, decl) in group {
            let value = match decl {
                ParamDecl::Float { default, .. } => Dynamic::from_float(*default),
                ParamDecl::Int { default, .. } => Dynamic::from_int(*default),
                ParamDecl::Pair { default, .. } => Dynamic::from_array(vec![
                    Dynamic::from_float(default[0]),
                    Dynamic::from_float(default[1]),
                ]),
                ParamDecl::Color { default } => Dynamic::from_array(
                    default.iter().map(|c| Dynamic::from_float(*c)).collect(),
                ),
                ParamDecl::Enum { options, default } => match options.get(*default) {
                    Some(opt) => Dynamic::from(opt.clone()),
                    None => Dynamic::UNIT,
                },
                ParamDecl::Flags { default, .. } => Dynamic::from_array(
                    default.iter().map(|f| Dynamic::from(f.clone())).collect(),
                ),
            };
            out.insert(name.as_str().into(), value);
        }
    }
    out
}

/// Validate declaration consistency that the type system cannot express.
pub fn validate(schema: &ParamSchema) -> Result<(), String> {
    for (group, params) in schema {
        for (name, decl) in params {
            let fail = |msg: &str| Err(format!("{group}.{name}: {msg}"));
            match decl {
                ParamDecl::Float { default, min, max } => {
                    if min > max || default < min || default > max {
                        return fail("default outside [min, max]");
                    }
                }
                ParamDecl::Int { default, min, max } => {
                    if min > max || default < min || default > max {
                        return fail("default outside [min, max]");
                    }
                }
                ParamDecl::Pair { default, min, max } => {
                    for axis in 0..2 {
                        if min[axis] > max[axis]
                            || default[axis] < min[axis]
                            || default[axis] > max[axis]
                        {
                            return fail("default outside [min, max]");
                        }
                    }
                }
                ParamDecl::Color { default } => {
                    if default.iter().any(|c| !(0.0..=1.0).contains(c)) {
                        return fail("color component outside [0, 1]");
                    }
                }
                ParamDecl::Enum { options, default } => {
                    if options.is_empty() {
                        return fail("enum has no options");
                    }
                    if *default >= options.len() {
                        return fail("enum default index out of range");
                    }
                }
                ParamDecl::Flags { flags, default } => {
                    if let Some(bad) = default.iter().find(|f| !flags.contains(f)) {
                        return Err(format!("{group}.{name}: unknown flag {bad:?}"));
                    }
                }
            }
        }
    }
    Ok(())
}
