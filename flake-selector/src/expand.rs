use std::collections::HashSet;

use crate::{Segment, Selector};

/// A source of attribute names available below a given attribute path.
pub trait AttrChildren {
    /// Names directly below `path`, in discovery order.
    ///
    /// A path that does not exist has no children.
    fn children(&self, path: &[&str]) -> Vec<String>;
}

/// A flat list of names: the children available at the level being expanded.
impl<S: AsRef<str>> AttrChildren for [S] {
    fn children(&self, _path: &[&str]) -> Vec<String> {
        self.iter().map(|name| name.as_ref().to_string()).collect()
    }
}

impl<S: AsRef<str>> AttrChildren for Vec<S> {
    fn children(&self, path: &[&str]) -> Vec<String> {
        self.as_slice().children(path)
    }
}

/// The output tree of `nix flake show --json`.
///
/// Nodes carrying a string `type` field (derivations, configurations, `unknown`) are leaves.
impl AttrChildren for serde_json::Value {
    fn children(&self, path: &[&str]) -> Vec<String> {
        let mut node = self;
        for name in path {
            if is_show_leaf(node) {
                return Vec::new();
            }
            match node.get(*name) {
                Some(child) => node = child,
                None => return Vec::new(),
            }
        }

        if is_show_leaf(node) {
            return Vec::new();
        }
        node.as_object()
            .map(|object| object.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn is_show_leaf(node: &serde_json::Value) -> bool {
    node.get("type").is_some_and(serde_json::Value::is_string)
}

/// Lazy expansion of a selector into concrete selectors.
///
/// The sequence is finite, preserves the order in which alternatives and children
/// were discovered, never yields the same selector twice, and can be restarted by
/// cloning it before iterating.
pub struct Expansion<'a, C: ?Sized> {
    selector: &'a Selector,
    children: &'a C,
    stack: Vec<Vec<Segment>>,
    seen: HashSet<Vec<Segment>>,
}

impl<'a, C: AttrChildren + ?Sized> Expansion<'a, C> {
    pub(crate) fn new(selector: &'a Selector, children: &'a C) -> Self {
        Self {
            selector,
            children,
            stack: vec![Vec::new()],
            seen: HashSet::new(),
        }
    }
}

impl<C: ?Sized> Clone for Expansion<'_, C> {
    fn clone(&self) -> Self {
        Self {
            selector: self.selector,
            children: self.children,
            stack: self.stack.clone(),
            seen: self.seen.clone(),
        }
    }
}

impl<C: AttrChildren + ?Sized> Iterator for Expansion<'_, C> {
    type Item = Selector;

    fn next(&mut self) -> Option<Selector> {
        let selector = self.selector;
        let segments = selector.segments();

        while let Some(mut partial) = self.stack.pop() {
            // Concrete segments never branch, so consume them eagerly.
            while let Some(segment) = segments.get(partial.len()) {
                match segment {
                    Segment::Attr(_) | Segment::Optional(_) => partial.push(segment.clone()),
                    Segment::Set(_) | Segment::Wildcard => break,
                }
            }

            let Some(segment) = segments.get(partial.len()) else {
                if self.seen.insert(partial.clone()) {
                    return Some(Selector::from_resolved(partial));
                }
                continue;
            };

            let branches: Vec<Segment> = match segment {
                Segment::Set(entries) => entries
                    .iter()
                    .map(|entry| {
                        if entry.optional {
                            Segment::Optional(entry.name.clone())
                        } else {
                            Segment::Attr(entry.name.clone())
                        }
                    })
                    .collect(),
                Segment::Wildcard => {
                    let path: Vec<&str> = partial.iter().filter_map(Segment::name).collect();
                    let names = self.children.children(&path);
                    tracing::trace!(
                        path = %path.join("."),
                        children = names.len(),
                        "Expanding wildcard"
                    );
                    names.into_iter().map(Segment::Attr).collect()
                }
                Segment::Attr(_) | Segment::Optional(_) => unreachable!("consumed above"),
            };

            // Reverse so that the first alternative is expanded first.
            for branch in branches.into_iter().rev() {
                let mut next = partial.clone();
                next.push(branch);
                self.stack.push(next);
            }
        }

        None
    }
}
