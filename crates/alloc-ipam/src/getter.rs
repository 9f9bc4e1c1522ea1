//! Resolves allocations that do not name a prefix by searching the RIB.

use crate::allocation::{IpAllocation, PrefixKind};
use crate::rib::{Rib, Route};
use alloc_common::AllocResult;
use tracing::{debug, instrument, warn};

pub struct GetterConfig<'a> {
    pub alloc: IpAllocation,
    pub rib: &'a dyn Rib,
}

/// Label-selector lookup of an existing allocation.
pub struct Getter<'a> {
    alloc: IpAllocation,
    rib: &'a dyn Rib,
}

/// First route in prefix order, independent of the RIB's own ordering.
fn first(mut routes: Vec<Route>) -> Option<Route> {
    routes.sort_by_key(Route::prefix);
    routes.into_iter().next()
}

impl<'a> Getter<'a> {
    pub fn new(config: GetterConfig<'a>) -> Self {
        Self {
            alloc: config.alloc,
            rib: config.rib,
        }
    }

    /// Fills in the allocated prefix (and gateway) when a route matches.
    ///
    /// No match is not an error; the status is left as it was.
    #[instrument(skip(self), fields(alloc = %self.alloc))]
    pub fn resolve(mut self) -> AllocResult<IpAllocation> {
        let selector = self.alloc.label_selector()?;
        let Some(route) = first(self.rib.get_by_label(&selector)) else {
            debug!(%selector, "no matching route");
            return Ok(self.alloc);
        };

        self.alloc.status.allocated_prefix = Some(route.prefix().to_string());
        if self.alloc.kind() == PrefixKind::Network && !self.alloc.create_prefix() {
            self.alloc.status.gateway = self.gateway();
        }
        Ok(self.alloc)
    }

    fn gateway(&self) -> Option<String> {
        let selector = match self.alloc.gateway_selector() {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "cannot build gateway label selector");
                return None;
            }
        };
        let gateway = first(self.rib.get_by_label(&selector))?;
        debug!(gateway = %gateway.prefix(), "gateway found");
        Some(gateway.prefix().addr().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::IpAllocationSpec;
    use crate::rib::Table;
    use alloc_common::{keys, AllocError, Gvk, Header, IndexRef, NamespacedName};
    use alloc_types::{LabelSelector, LabelSelectorRequirement, Labels, Operator};
    use pretty_assertions::assert_eq;

    fn alloc(name: &str, spec: IpAllocationSpec) -> IpAllocation {
        IpAllocation::new(
            Header::new(
                Gvk::new("ipam.alloc.io", "v1alpha1", "IPAllocation"),
                NamespacedName::new("default", name),
            ),
            IndexRef::new("ipam.alloc.io", "default", "vpc-1"),
            spec,
        )
    }

    fn add(rib: &Table, prefix: &str, labels: Labels) {
        rib.add(Route::new(prefix.parse().unwrap(), labels)).unwrap();
    }

    fn blue() -> LabelSelector {
        LabelSelector::from_labels([("net", "blue")].into_iter().collect())
    }

    #[test]
    fn test_no_match_leaves_status_empty() {
        let rib = Table::new();
        let a = alloc("pod-1", IpAllocationSpec::new(PrefixKind::Loopback));
        let resolved = Getter::new(GetterConfig { alloc: a, rib: &rib }).resolve().unwrap();
        assert_eq!(resolved.status.allocated_prefix, None);
        assert_eq!(resolved.status.gateway, None);
    }

    #[test]
    fn test_smallest_prefix_wins() {
        let rib = Table::new();
        let a = alloc("pod-1", IpAllocationSpec::new(PrefixKind::Loopback));
        add(&rib, "10.0.0.9/32", a.full_labels());
        add(&rib, "10.0.0.3/32", a.full_labels());
        let resolved = Getter::new(GetterConfig { alloc: a, rib: &rib }).resolve().unwrap();
        assert_eq!(resolved.status.allocated_prefix.as_deref(), Some("10.0.0.3/32"));
    }

    #[test]
    fn test_network_address_gets_gateway() {
        let rib = Table::new();
        let a = alloc("pod-1", IpAllocationSpec::new(PrefixKind::Network).with_selector(blue()));
        let mut labels = a.full_labels();
        labels.insert("net", "blue");
        add(&rib, "10.0.0.5/32", labels);
        add(
            &rib,
            "10.0.0.1/24",
            [("net", "blue"), (keys::GATEWAY, "true")].into_iter().collect(),
        );

        let resolved = Getter::new(GetterConfig { alloc: a, rib: &rib }).resolve().unwrap();
        assert_eq!(resolved.status.allocated_prefix.as_deref(), Some("10.0.0.5/32"));
        assert_eq!(resolved.status.gateway.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_network_with_create_prefix_has_no_gateway() {
        let rib = Table::new();
        let a = alloc(
            "net-1",
            IpAllocationSpec::new(PrefixKind::Network)
                .with_create_prefix(true)
                .with_selector(blue()),
        );
        let mut labels = a.full_labels();
        labels.insert("net", "blue");
        add(&rib, "10.0.0.0/24", labels);
        add(
            &rib,
            "10.0.0.1/24",
            [("net", "blue"), (keys::GATEWAY, "true")].into_iter().collect(),
        );

        let resolved = Getter::new(GetterConfig { alloc: a, rib: &rib }).resolve().unwrap();
        assert_eq!(resolved.status.allocated_prefix.as_deref(), Some("10.0.0.0/24"));
        assert_eq!(resolved.status.gateway, None);
    }

    #[test]
    fn test_malformed_selector_fails() {
        let rib = Table::new();
        let selector = LabelSelector {
            match_labels: Labels::new(),
            match_expressions: vec![LabelSelectorRequirement {
                key: "net".into(),
                operator: Operator::In,
                values: Vec::new(),
            }],
        };
        let a = alloc("pod-1", IpAllocationSpec::new(PrefixKind::Loopback).with_selector(selector));
        let err = Getter::new(GetterConfig { alloc: a, rib: &rib }).resolve().unwrap_err();
        assert!(matches!(err, AllocError::Selector { .. }));
    }
}
