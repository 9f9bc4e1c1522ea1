//! Routing information base: the per-index table of allocated prefixes.
//!
//! The [`Rib`] trait is the contract the applicator, getter and backend rely
//! on. [`Table`] is the in-memory implementation, an ordered map keyed by the
//! exact prefix value.

use alloc_common::RibError;
use alloc_types::{AddressFamily, IpPrefix, Labels, Selector};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque per-route payload.
pub type RouteData = serde_json::Map<String, serde_json::Value>;

/// One prefix in the RIB together with its labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    prefix: IpPrefix,
    labels: Labels,
    #[serde(default, skip_serializing_if = "RouteData::is_empty")]
    data: RouteData,
}

impl Route {
    pub fn new(prefix: IpPrefix, labels: Labels) -> Self {
        Self {
            prefix,
            labels,
            data: RouteData::new(),
        }
    }

    pub fn prefix(&self) -> IpPrefix {
        self.prefix
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Returns a copy carrying `labels` instead of the current set.
    pub fn update_labels(&self, labels: Labels) -> Self {
        Self {
            prefix: self.prefix,
            labels,
            data: self.data.clone(),
        }
    }
}

/// Ordered prefix index with label search.
///
/// Implementations must be safe for concurrent readers and serialize writers.
pub trait Rib: Send + Sync {
    /// Exact lookup.
    fn get(&self, prefix: &IpPrefix) -> Option<Route>;

    /// All routes whose labels match `selector`, in prefix order.
    fn get_by_label(&self, selector: &Selector) -> Vec<Route>;

    /// Inserts a new route; fails with `AlreadyExists` if the prefix is taken.
    fn add(&self, route: Route) -> Result<(), RibError>;

    /// Replaces an existing route; fails with `NotFound` if absent.
    fn set(&self, route: Route) -> Result<(), RibError>;

    /// Removes the route with exactly this prefix.
    fn delete(&self, prefix: &IpPrefix) -> Result<Route, RibError>;

    /// Routes strictly more specific than `prefix` and contained in it.
    fn children(&self, prefix: &IpPrefix) -> Vec<Route>;

    /// Routes strictly less specific than `prefix` that contain it.
    fn parents(&self, prefix: &IpPrefix) -> Vec<Route>;

    /// Every route, in prefix order.
    fn routes(&self) -> Vec<Route>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory RIB.
#[derive(Debug, Default)]
pub struct Table {
    family: Option<AddressFamily>,
    routes: RwLock<BTreeMap<IpPrefix, Route>>,
}

impl Table {
    /// Dual-stack table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table that only accepts prefixes of `family`.
    pub fn with_family(family: AddressFamily) -> Self {
        Self {
            family: Some(family),
            routes: RwLock::default(),
        }
    }

    fn check_family(&self, prefix: &IpPrefix) -> Result<(), RibError> {
        match self.family {
            Some(family) if family != prefix.family() => Err(RibError::FamilyMismatch {
                prefix: prefix.to_string(),
                family: family.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

impl Rib for Table {
    fn get(&self, prefix: &IpPrefix) -> Option<Route> {
        self.routes.read().get(prefix).cloned()
    }

    fn get_by_label(&self, selector: &Selector) -> Vec<Route> {
        self.routes
            .read()
            .values()
            .filter(|r| selector.matches(&r.labels))
            .cloned()
            .collect()
    }

    fn add(&self, route: Route) -> Result<(), RibError> {
        self.check_family(&route.prefix)?;
        let mut routes = self.routes.write();
        if routes.contains_key(&route.prefix) {
            return Err(RibError::AlreadyExists(route.prefix.to_string()));
        }
        routes.insert(route.prefix, route);
        Ok(())
    }

    fn set(&self, route: Route) -> Result<(), RibError> {
        self.check_family(&route.prefix)?;
        let mut routes = self.routes.write();
        match routes.get_mut(&route.prefix) {
            Some(existing) => {
                *existing = route;
                Ok(())
            }
            None => Err(RibError::NotFound(route.prefix.to_string())),
        }
    }

    fn delete(&self, prefix: &IpPrefix) -> Result<Route, RibError> {
        self.routes
            .write()
            .remove(prefix)
            .ok_or_else(|| RibError::NotFound(prefix.to_string()))
    }

    fn children(&self, prefix: &IpPrefix) -> Vec<Route> {
        let network = prefix.network();
        let routes = self.routes.read();
        // Children sort at or after the network address and are contiguous.
        routes
            .range(network..)
            .take_while(|(k, _)| network.contains_addr(&k.addr()))
            .filter(|(k, _)| k.prefix_len() > prefix.prefix_len())
            .map(|(_, r)| r.clone())
            .collect()
    }

    fn parents(&self, prefix: &IpPrefix) -> Vec<Route> {
        self.routes
            .read()
            .values()
            .filter(|r| r.prefix.prefix_len() < prefix.prefix_len() && r.prefix.contains(prefix))
            .cloned()
            .collect()
    }

    fn routes(&self) -> Vec<Route> {
        self.routes.read().values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.routes.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc_types::{Operator, Requirement};
    use pretty_assertions::assert_eq;

    fn p(s: &str) -> IpPrefix {
        s.parse().unwrap()
    }

    fn route(prefix: &str, owner: &str) -> Route {
        Route::new(p(prefix), [("owner", owner)].into_iter().collect())
    }

    fn prefixes(routes: Vec<Route>) -> Vec<String> {
        routes.iter().map(|r| r.prefix().to_string()).collect()
    }

    #[test]
    fn test_add_rejects_duplicate() {
        let table = Table::new();
        table.add(route("10.0.0.0/24", "a")).unwrap();
        let err = table.add(route("10.0.0.0/24", "b")).unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&p("10.0.0.0/24")).unwrap().labels().get("owner"), Some("a"));
    }

    #[test]
    fn test_exact_prefix_value_is_the_key() {
        let table = Table::new();
        table.add(route("10.0.0.0/24", "a")).unwrap();
        table.add(route("10.0.0.1/24", "b")).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_set_requires_existing() {
        let table = Table::new();
        assert_eq!(
            table.set(route("10.0.0.0/24", "a")),
            Err(RibError::NotFound("10.0.0.0/24".into()))
        );
        table.add(route("10.0.0.0/24", "a")).unwrap();
        table.set(route("10.0.0.0/24", "b")).unwrap();
        assert_eq!(table.get(&p("10.0.0.0/24")).unwrap().labels().get("owner"), Some("b"));
    }

    #[test]
    fn test_delete() {
        let table = Table::new();
        table.add(route("10.0.0.0/24", "a")).unwrap();
        assert!(table.delete(&p("10.0.0.0/24")).is_ok());
        assert!(table.delete(&p("10.0.0.0/24")).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_family_restricted_table() {
        let table = Table::with_family(AddressFamily::Ipv4);
        let err = table.add(route("2001:db8::/32", "a")).unwrap_err();
        assert!(matches!(err, RibError::FamilyMismatch { .. }));
    }

    #[test]
    fn test_children_and_parents() {
        let table = Table::new();
        for prefix in [
            "10.0.0.0/16",
            "10.0.0.0/24",
            "10.0.0.5/32",
            "10.0.0.128/25",
            "10.0.1.0/24",
            "10.1.0.0/24",
        ] {
            table.add(route(prefix, "a")).unwrap();
        }
        assert_eq!(
            prefixes(table.children(&p("10.0.0.0/24"))),
            vec!["10.0.0.5/32", "10.0.0.128/25"]
        );
        assert_eq!(
            prefixes(table.children(&p("10.0.0.0/16"))),
            vec!["10.0.0.0/24", "10.0.0.5/32", "10.0.0.128/25", "10.0.1.0/24"]
        );
        // host bits in the requested prefix do not matter
        assert_eq!(table.children(&p("10.0.0.1/24")).len(), 2);
        assert_eq!(
            prefixes(table.parents(&p("10.0.0.5/32"))),
            vec!["10.0.0.0/16", "10.0.0.0/24"]
        );
    }

    #[test]
    fn test_get_by_label() {
        let table = Table::new();
        table.add(route("10.0.1.0/24", "b")).unwrap();
        table.add(route("10.0.0.0/24", "a")).unwrap();
        table.add(route("10.0.2.0/24", "a")).unwrap();
        let selector =
            Selector::everything().with(Requirement::new("owner", Operator::In, ["a"]).unwrap());
        assert_eq!(
            prefixes(table.get_by_label(&selector)),
            vec!["10.0.0.0/24", "10.0.2.0/24"]
        );
        assert_eq!(table.get_by_label(&Selector::everything()).len(), 3);
    }
}
