//! Namespace binding resolution.
//!
//! Bindings live on one flat stack; the active binding for a prefix is the
//! topmost entry carrying it. Every start tag pushes a scope mark, every
//! end tag pops back to it, so bindings introduced by a tag die with it.

use crate::errors::XmlError;

pub(crate) const XML_PREFIX: &str = "xml";
pub(crate) const XML_URI: &str = "http://www.w3.org/XML/1998/namespace";
pub(crate) const XMLNS_PREFIX: &str = "xmlns";
pub(crate) const XMLNS_URI: &str = "http://www.w3.org/2000/xmlns/";

#[derive(Debug, Clone)]
pub(crate) struct Binding {
    /// `None` is the default namespace.
    pub(crate) prefix: Option<String>,
    /// Empty means the prefix (or default) is unbound at this point.
    pub(crate) uri: String,
}

#[derive(Debug, Default)]
pub(crate) struct NamespaceBinder {
    bindings: Vec<Binding>,
    scopes: Vec<usize>,
}

impl NamespaceBinder {
    pub(crate) fn new() -> Self {
        // The xml prefix is bound from the start and can never change.
        Self {
            bindings: vec![Binding {
                prefix: Some(XML_PREFIX.to_string()),
                uri: XML_URI.to_string(),
            }],
            scopes: Vec::new(),
        }
    }

    /// Open the scope of a start tag.
    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(self.bindings.len());
    }

    /// Close the innermost scope, returning its bindings newest-first so
    /// end-namespace events fire in LIFO order.
    pub(crate) fn pop_scope(&mut self) -> Vec<Binding> {
        let mark = self.scopes.pop().unwrap_or(0);
        let mut popped = self.bindings.split_off(mark);
        popped.reverse();
        popped
    }

    /// Establish a binding from an `xmlns` / `xmlns:prefix` attribute.
    /// The reserved names and URIs are enforced here.
    pub(crate) fn bind(
        &mut self,
        prefix: Option<&str>,
        uri: &str,
    ) -> Result<(), XmlError> {
        if let Some(p) = prefix {
            if p == XMLNS_PREFIX {
                return Err(XmlError::ReservedPrefixXmlns);
            }
            if p == XML_PREFIX {
                if uri != XML_URI {
                    return Err(XmlError::ReservedPrefixXml);
                }
            } else if uri == XML_URI || uri == XMLNS_URI {
                return Err(XmlError::ReservedNamespaceUri);
            }
            if uri.is_empty() {
                return Err(XmlError::UndeclaringPrefix);
            }
        } else {
            if uri == XML_URI || uri == XMLNS_URI {
                return Err(XmlError::ReservedNamespaceUri);
            }
            // An empty URI legally unbinds the default namespace.
        }
        self.bindings.push(Binding {
            prefix: prefix.map(str::to_string),
            uri: uri.to_string(),
        });
        Ok(())
    }

    /// URI currently bound to `prefix`; `None` when unbound.
    pub(crate) fn resolve(&self, prefix: &str) -> Option<&str> {
        if prefix == XML_PREFIX {
            return Some(XML_URI);
        }
        self.bindings
            .iter()
            .rev()
            .find(|b| b.prefix.as_deref() == Some(prefix))
            .and_then(|b| {
                if b.uri.is_empty() {
                    None
                } else {
                    Some(b.uri.as_str())
                }
            })
    }

    /// URI of the default namespace, if one is in force.
    pub(crate) fn resolve_default(&self) -> Option<&str> {
        self.bindings
            .iter()
            .rev()
            .find(|b| b.prefix.is_none())
            .and_then(|b| {
                if b.uri.is_empty() {
                    None
                } else {
                    Some(b.uri.as_str())
                }
            })
    }
}

/// Split a qualified name at its colon. Returns `(prefix, local)`; a name
/// without a colon has no prefix.
pub(crate) fn split_qname(name: &str) -> (Option<&str>, &str) {
    match name.find(':') {
        Some(idx) => (Some(&name[..idx]), &name[idx + 1..]),
        None => (None, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn innermost_binding_wins() {
        let mut b = NamespaceBinder::new();
        b.push_scope();
        b.bind(Some("p"), "urn:outer").unwrap();
        b.push_scope();
        b.bind(Some("p"), "urn:inner").unwrap();
        assert_eq!(b.resolve("p"), Some("urn:inner"));
        b.pop_scope();
        assert_eq!(b.resolve("p"), Some("urn:outer"));
        b.pop_scope();
        assert_eq!(b.resolve("p"), None);
    }

    #[test]
    fn default_namespace_can_be_unbound() {
        let mut b = NamespaceBinder::new();
        b.push_scope();
        b.bind(None, "urn:default").unwrap();
        assert_eq!(b.resolve_default(), Some("urn:default"));
        b.push_scope();
        b.bind(None, "").unwrap();
        assert_eq!(b.resolve_default(), None);
        b.pop_scope();
        assert_eq!(b.resolve_default(), Some("urn:default"));
    }

    #[test]
    fn prefixed_undeclaring_is_rejected() {
        let mut b = NamespaceBinder::new();
        b.push_scope();
        assert_eq!(b.bind(Some("p"), ""), Err(XmlError::UndeclaringPrefix));
    }

    #[test]
    fn reserved_prefixes() {
        let mut b = NamespaceBinder::new();
        b.push_scope();
        assert_eq!(
            b.bind(Some("xmlns"), "urn:x"),
            Err(XmlError::ReservedPrefixXmlns)
        );
        assert_eq!(
            b.bind(Some("xml"), "urn:x"),
            Err(XmlError::ReservedPrefixXml)
        );
        // Redundantly binding xml to its own URI is fine.
        assert!(b.bind(Some("xml"), XML_URI).is_ok());
        assert_eq!(
            b.bind(Some("p"), XML_URI),
            Err(XmlError::ReservedNamespaceUri)
        );
        assert_eq!(
            b.bind(None, XMLNS_URI),
            Err(XmlError::ReservedNamespaceUri)
        );
    }

    #[test]
    fn xml_prefix_always_resolves() {
        let b = NamespaceBinder::new();
        assert_eq!(b.resolve("xml"), Some(XML_URI));
    }

    #[test]
    fn scope_pop_order_is_lifo() {
        let mut b = NamespaceBinder::new();
        b.push_scope();
        b.bind(Some("a"), "urn:a").unwrap();
        b.bind(Some("b"), "urn:b").unwrap();
        let popped = b.pop_scope();
        let prefixes: Vec<_> = popped.iter().map(|p| p.prefix.as_deref()).collect();
        assert_eq!(prefixes, vec![Some("b"), Some("a")]);
    }

    #[test]
    fn qname_splitting() {
        assert_eq!(split_qname("p:local"), (Some("p"), "local"));
        assert_eq!(split_qname("plain"), (None, "plain"));
    }
}
