//! Plain-text rendering and argument parsing for the CLI.

use std::fmt::Write as _;

use strand_core::history::NodeSummary;
use strand_core::{Attr, EntityFacts, Gid, NodeVal, Value, ValueType};

/// One line per node: short hash, kind, source instance, fact count, time.
pub fn log_line(node: &NodeSummary) -> String {
    format!("{} {}", node, node.timestamp.format("%Y-%m-%dT%H:%M:%SZ"))
}

/// Header plus one fact per line.
pub fn node_text(node: &NodeVal) -> String {
    let mut out = String::new();
    match node.hash {
        Some(hash) => {
            let _ = writeln!(out, "{} {}", node.kind_name(), hash);
        }
        None => {
            let _ = writeln!(out, "{}", node.kind_name());
        }
    }
    let _ = writeln!(out, "source: {}", node.source);
    let _ = writeln!(out, "time:   {}", node.timestamp.to_rfc3339());
    for parent in node.parents() {
        if let Some(parent) = parent.hash() {
            let _ = writeln!(out, "parent: {}", parent);
        }
    }
    for fact in &node.data {
        let _ = writeln!(out, "  {}", fact);
    }
    out
}

/// `gid` followed by its attributes, one value per line.
pub fn entity_text(gid: Gid, facts: &EntityFacts) -> String {
    let mut out = format!("{gid}\n");
    for (attr, values) in facts.iter() {
        for value in values {
            let _ = writeln!(out, "  {attr} = {value}");
        }
    }
    out
}

pub fn attr_line(attr: &Attr) -> String {
    let mut flags = Vec::new();
    if attr.unique {
        flags.push("unique");
    }
    if attr.is_list() {
        flags.push("list");
    }
    let flags = if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    };
    format!("{} {} {}{}", attr.id, attr.name, attr.value_type(), flags)
}

pub fn parse_value_type(raw: &str) -> Result<ValueType, String> {
    Ok(match raw.to_ascii_lowercase().as_str() {
        "bool" => ValueType::Bool,
        "byte" => ValueType::Byte,
        "int" => ValueType::Int,
        "long" => ValueType::Long,
        "string" | "str" => ValueType::Str,
        "bytes" => ValueType::Bytes,
        "decimal" => ValueType::Decimal,
        "instant" => ValueType::Instant,
        "zoned" => ValueType::Zoned,
        "ref" => ValueType::Ref,
        _ => return Err(format!("unknown value type '{raw}'")),
    })
}

/// Parses a command-line value for an attribute of type `ty`.
pub fn parse_value(ty: ValueType, raw: &str) -> Result<Value, String> {
    let bad = || format!("'{raw}' is not a valid {ty} value");
    match ty {
        ValueType::Bool => raw.parse().map(Value::Bool).map_err(|_| bad()),
        ValueType::Byte | ValueType::Int | ValueType::Long => raw
            .parse::<i64>()
            .map(|n| Value::Long(n).coerce_to(ty))
            .map_err(|_| bad()),
        ValueType::Str => Ok(Value::Str(raw.to_string())),
        ValueType::Ref => raw.parse::<Gid>().map(Value::Ref).map_err(|_| bad()),
        _ => Err(format!("values of type {ty} cannot be given on the command line")),
    }
}
