//! Evaluation of selectors containing optional segments.
//!
//! `nix eval` fails on a missing attribute, so the selector is split in two: the
//! longest leading run of required segments becomes the installable, and the remaining
//! segments are walked by a generated `--apply` function that reports whether each
//! optional attribute exists.

use flake_selector::{Segment, Selector, render_attr_path};
use serde::Deserialize;

/// How a concrete selector is evaluated.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct EvalPlan<'a> {
    /// A leading optional segment, checked against the flake's top-level outputs.
    pub root_check: Option<&'a str>,
    /// Attribute names forming the installable.
    pub prefix: Vec<&'a str>,
    /// Segments walked by the `--apply` function. Empty when no walk is needed.
    pub rest: &'a [Segment],
}

impl EvalPlan<'_> {
    pub fn attr_path(&self) -> String {
        render_attr_path(&self.prefix)
    }

    pub fn apply_function(&self) -> Option<String> {
        (!self.rest.is_empty()).then(|| apply_function(self.rest))
    }
}

/// Split a concrete selector into installable and walked suffix.
///
/// Returns `None` for selectors with wildcard or set segments.
pub(crate) fn plan(selector: &Selector) -> Option<EvalPlan<'_>> {
    let segments = selector.segments();
    if !selector.is_concrete() {
        return None;
    }

    let mut prefix = Vec::new();
    let mut root_check = None;
    let mut start = 0;

    if let Some(Segment::Optional(name)) = segments.first() {
        root_check = Some(name.as_str());
        prefix.push(name.as_str());
        start = 1;
    }

    let split = segments[start..]
        .iter()
        .position(|segment| matches!(segment, Segment::Optional(_)))
        .map_or(segments.len(), |i| start + i);

    prefix.extend(segments[start..split].iter().filter_map(Segment::name));

    Some(EvalPlan {
        root_check,
        prefix,
        rest: &segments[split..],
    })
}

/// A Nix function mapping the installable's value to `{ present; value; }`.
///
/// Missing optional attributes yield `{ present = false; }`; missing required ones
/// still fail the evaluation.
pub(crate) fn apply_function(rest: &[Segment]) -> String {
    let mut body = String::from("{ present = true; value = v; }");
    for segment in rest.iter().rev() {
        let Some(name) = segment.name() else {
            continue;
        };
        let name = nix_string(name);
        body = match segment {
            Segment::Optional(_) => {
                format!("if !(v ? {name}) then {{ present = false; }} else (v: {body}) v.{name}")
            }
            _ => format!("(v: {body}) v.{name}"),
        };
    }
    format!("v: {body}")
}

/// Quote a string as a Nix string literal.
pub(crate) fn nix_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Result of an evaluation through [`apply_function`].
#[derive(Debug, Deserialize)]
pub(crate) struct Probe {
    pub present: bool,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(text: &str) -> Selector {
        Selector::parse(text).unwrap()
    }

    #[test]
    fn test_plan_without_optionals() {
        let selector = parse("packages.x86_64-linux.hello");
        let plan = super::plan(&selector).unwrap();
        assert_eq!(plan.root_check, None);
        assert_eq!(plan.attr_path(), "packages.x86_64-linux.hello");
        assert_eq!(plan.apply_function(), None);
    }

    #[test]
    fn test_plan_splits_at_first_optional() {
        let selector = parse("nixosConfigurations.host.?config.services");
        let plan = super::plan(&selector).unwrap();
        assert_eq!(plan.prefix, vec!["nixosConfigurations", "host"]);
        assert_eq!(plan.rest.len(), 2);
        assert_eq!(
            plan.apply_function().unwrap(),
            r#"v: if !(v ? "config") then { present = false; } else (v: (v: { present = true; value = v; }) v."services") v."config""#
        );
    }

    #[test]
    fn test_plan_leading_optional() {
        let selector = parse("?lib.version");
        let plan = super::plan(&selector).unwrap();
        assert_eq!(plan.root_check, Some("lib"));
        assert_eq!(plan.prefix, vec!["lib", "version"]);
        assert!(plan.rest.is_empty());

        let selector = parse("?overlays.?default");
        let plan = super::plan(&selector).unwrap();
        assert_eq!(plan.root_check, Some("overlays"));
        assert_eq!(plan.prefix, vec!["overlays"]);
        assert_eq!(plan.rest.len(), 1);
    }

    #[test]
    fn test_plan_rejects_patterns() {
        assert!(plan(&parse("packages.*")).is_none());
        assert!(plan(&parse("a.{b,c}")).is_none());
    }

    #[test]
    fn test_nix_string_escapes() {
        assert_eq!(nix_string("plain"), r#""plain""#);
        assert_eq!(nix_string(r#"a"b\c"#), r#""a\"b\\c""#);
        assert_eq!(nix_string("${x} $y"), r#""\${x} $y""#);
        assert_eq!(nix_string("a\nb"), r#""a\nb""#);
    }

    #[test]
    fn test_probe_decoding() {
        let probe: Probe = serde_json::from_str(r#"{"present":false}"#).unwrap();
        assert!(!probe.present);
        assert_eq!(probe.value, None);

        let probe: Probe = serde_json::from_str(r#"{"present":true,"value":null}"#).unwrap();
        assert!(probe.present);
    }
}
