//! Path trie with static > param > wildcard priority.
//!
//! Patterns are `/`-separated. A segment starting with `:` captures one path
//! segment; a final segment starting with `*` captures the rest of the path.
//! Lookup prefers a static child, then the param child, then the wildcard,
//! and backtracks to the closest ancestor wildcard when a deeper branch dead
//! ends. A static match is never retried as a param, which keeps the cost
//! proportional to the path length, not to the number of routes.

use std::collections::HashMap;

use crate::error::{EdgeError, EdgeResult};

/// Captured `(name, value)` pairs, in path order.
pub type Params = Vec<(String, String)>;

struct ParamChild<T> {
    name: String,
    node: Node<T>,
}

struct Node<T> {
    value: Option<T>,
    statics: HashMap<String, Node<T>>,
    param: Option<Box<ParamChild<T>>>,
    wildcard: Option<(String, T)>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            value: None,
            statics: HashMap::new(),
            param: None,
            wildcard: None,
        }
    }
}

impl<T> Node<T> {
    /// Descends into the best child for `head` only: the static child if
    /// there is one, else the param child. A dead end falls back to the
    /// wildcard of this node, so each level is visited once.
    fn find<'a>(&'a self, segs: &[&str], params: &mut Params) -> Option<&'a T> {
        let Some((head, rest)) = segs.split_first() else {
            return self.value.as_ref();
        };

        let mark = params.len();
        let found = if let Some(child) = self.statics.get(*head) {
            child.find(rest, params)
        } else if let Some(p) = &self.param {
            params.push((p.name.clone(), (*head).to_string()));
            p.node.find(rest, params)
        } else {
            None
        };
        if found.is_some() {
            return found;
        }
        params.truncate(mark);

        let (name, v) = self.wildcard.as_ref()?;
        params.push((name.clone(), segs.join("/")));
        Some(v)
    }
}

/// Route trie for one HTTP method.
pub struct Trie<T> {
    root: Node<T>,
    len: usize,
}

impl<T> Default for Trie<T> {
    fn default() -> Self {
        Self {
            root: Node::default(),
            len: 0,
        }
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

impl<T> Trie<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts `pattern`. Fails on malformed or duplicate patterns.
    pub fn insert(&mut self, pattern: &str, value: T) -> EdgeResult<()> {
        let segs = segments(pattern);
        let mut node = &mut self.root;

        for (i, seg) in segs.iter().enumerate() {
            if let Some(name) = seg.strip_prefix('*') {
                if i + 1 != segs.len() {
                    return Err(EdgeError::invalid_route(pattern, "wildcard must be the last segment"));
                }
                if node.wildcard.is_some() {
                    return Err(EdgeError::invalid_route(pattern, "duplicate wildcard"));
                }
                node.wildcard = Some((name.to_string(), value));
                self.len += 1;
                return Ok(());
            }

            if let Some(name) = seg.strip_prefix(':') {
                if name.is_empty() {
                    return Err(EdgeError::invalid_route(pattern, "unnamed parameter"));
                }
                let child = node.param.get_or_insert_with(|| {
                    Box::new(ParamChild {
                        name: name.to_string(),
                        node: Node::default(),
                    })
                });
                if child.name != name {
                    return Err(EdgeError::invalid_route(
                        pattern,
                        format!("parameter ':{name}' conflicts with ':{}'", child.name),
                    ));
                }
                node = &mut child.node;
            } else {
                node = node.statics.entry((*seg).to_string()).or_default();
            }
        }

        if node.value.is_some() {
            return Err(EdgeError::invalid_route(pattern, "duplicate route"));
        }
        node.value = Some(value);
        self.len += 1;
        Ok(())
    }

    /// Resolves `path` (without query string).
    pub fn find(&self, path: &str) -> Option<(&T, Params)> {
        let segs = segments(path);
        let mut params = Params::new();
        self.root.find(&segs, &mut params).map(|v| (v, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trie() -> Trie<&'static str> {
        let mut t = Trie::new();
        t.insert("/a/static", "static").unwrap();
        t.insert("/a/:param", "param").unwrap();
        t.insert("/a/*wild", "wild").unwrap();
        t
    }

    #[test]
    fn test_priority_static_param_wildcard() {
        let t = trie();
        assert_eq!(t.find("/a/static").unwrap().0, &"static");

        let (v, params) = t.find("/a/other").unwrap();
        assert_eq!(*v, "param");
        assert_eq!(params, vec![("param".to_string(), "other".to_string())]);

        let (v, params) = t.find("/a/x/y").unwrap();
        assert_eq!(*v, "wild");
        assert_eq!(params, vec![("wild".to_string(), "x/y".to_string())]);
    }

    #[test]
    fn test_backtracks_to_ancestor_wildcard() {
        let mut t = Trie::new();
        t.insert("/files/*path", "files").unwrap();
        t.insert("/files/public/index", "index").unwrap();
        t.insert("/users/:id/posts", "posts").unwrap();

        assert_eq!(t.find("/files/public/index").unwrap().0, &"index");
        let (v, params) = t.find("/files/public/other").unwrap();
        assert_eq!(*v, "files");
        assert_eq!(params[0].1, "public/other");

        let (_, params) = t.find("/users/7/posts").unwrap();
        assert_eq!(params, vec![("id".to_string(), "7".to_string())]);
        assert!(t.find("/users/7").is_none());
        assert!(t.find("/users/7/posts/x").is_none());
    }

    #[test]
    fn test_static_segment_is_not_retried_as_param() {
        let mut t = Trie::new();
        t.insert("/a/b/c", "deep").unwrap();
        t.insert("/a/:p", "param").unwrap();
        t.insert("/a/:p/c/d", "param_deep").unwrap();
        t.insert("/*rest", "catch").unwrap();

        assert_eq!(t.find("/a/x").unwrap().0, &"param");
        assert_eq!(t.find("/a/b/c").unwrap().0, &"deep");
        // "b" commits to the static branch; the closest wildcard answers
        let (v, params) = t.find("/a/b").unwrap();
        assert_eq!(*v, "catch");
        assert_eq!(params, vec![("rest".to_string(), "a/b".to_string())]);
        let (v, params) = t.find("/a/b/c/d").unwrap();
        assert_eq!(*v, "catch");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_root_and_trailing_slashes() {
        let mut t = Trie::new();
        t.insert("/", "root").unwrap();
        t.insert("/x/", "x").unwrap();
        assert_eq!(t.find("").unwrap().0, &"root");
        assert_eq!(t.find("/x").unwrap().0, &"x");
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_invalid_patterns() {
        let mut t = trie();
        assert!(t.insert("/a/static", "dup").is_err());
        assert!(t.insert("/a/:other", "conflict").is_err());
        assert!(t.insert("/b/*rest/more", "bad").is_err());
        assert!(t.insert("/c/:", "unnamed").is_err());
        assert_eq!(t.len(), 3);
    }
}
