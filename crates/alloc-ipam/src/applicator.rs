//! Applies an allocation with an explicit prefix to the RIB.

use crate::allocation::{IpAllocation, PrefixInfo};
use crate::rib::{Rib, Route};
use crate::watcher::Watcher;
use alloc_common::{keys, AllocError, AllocResult, StatusCode};
use tracing::{debug, error, info, instrument};

/// Inputs of one apply.
pub struct ApplicatorConfig<'a> {
    /// Seeding pass at index creation; suppresses child invalidation.
    pub initializing: bool,
    pub alloc: IpAllocation,
    pub rib: &'a dyn Rib,
    pub prefix_info: PrefixInfo,
    pub watcher: &'a dyn Watcher,
}

/// Reconciles one allocation against the RIB: create the route when it is
/// missing, relabel it when ownership changed.
pub struct PrefixApplicator<'a> {
    initializing: bool,
    alloc: IpAllocation,
    rib: &'a dyn Rib,
    pi: PrefixInfo,
    watcher: &'a dyn Watcher,
}

impl<'a> PrefixApplicator<'a> {
    pub fn new(config: ApplicatorConfig<'a>) -> Self {
        Self {
            initializing: config.initializing,
            alloc: config.alloc,
            rib: config.rib,
            pi: config.prefix_info,
            watcher: config.watcher,
        }
    }

    /// The prefix the route is stored under.
    fn route_prefix(&self) -> alloc_types::IpPrefix {
        if self.alloc.is_network_address() {
            self.pi.address_prefix()
        } else {
            self.pi.prefix()
        }
    }

    #[instrument(skip(self), fields(alloc = %self.alloc, prefix = %self.pi.prefix()))]
    pub async fn apply(mut self) -> AllocResult<IpAllocation> {
        let prefix = self.route_prefix();
        let labels = self.alloc.full_labels();

        match self.rib.get(&prefix) {
            Some(route) => {
                debug!(%prefix, "route exists");
                if route.labels() != &labels {
                    let updated = route.update_labels(labels.clone());
                    if let Err(e) = self.rib.set(updated) {
                        if !e.is_already_exists() {
                            error!(%prefix, error = %e, "cannot update prefix");
                            return Err(AllocError::rib_write("update", prefix, e));
                        }
                    }
                    info!(%prefix, "route labels updated");

                    if !self.initializing && !self.pi.is_address_prefix() && self.alloc.create_prefix() {
                        self.invalidate_children(&route, &labels).await;
                    }
                }
            }
            None => {
                debug!(%prefix, "route does not exist");
                if let Err(e) = self.rib.add(Route::new(prefix, labels)) {
                    if !e.is_already_exists() {
                        error!(%prefix, error = %e, "cannot add prefix");
                        return Err(AllocError::rib_write("add", prefix, e));
                    }
                    debug!(%prefix, "route added concurrently");
                }
            }
        }

        self.alloc.status.allocated_prefix = Some(self.alloc.allocated_prefix(&self.pi));
        Ok(self.alloc)
    }

    /// Removes children held by a different owner and notifies their watchers.
    async fn invalidate_children(&self, route: &Route, labels: &alloc_types::Labels) {
        let owner = |l: &alloc_types::Labels| {
            (
                l.get(keys::NSN_NAME).map(str::to_string),
                l.get(keys::NSN_NAMESPACE).map(str::to_string),
            )
        };
        let new_owner = owner(labels);

        let mut invalidated = Vec::new();
        for child in self.rib.children(&route.prefix()) {
            if owner(child.labels()) == new_owner {
                continue;
            }
            match self.rib.delete(&child.prefix()) {
                Ok(_) => invalidated.push(child),
                Err(e) => error!(prefix = %child.prefix(), error = %e, "cannot delete route from rib"),
            }
        }

        if !invalidated.is_empty() {
            info!(prefix = %route.prefix(), children = invalidated.len(), "invalidated child routes");
            self.watcher.handle_update(invalidated, StatusCode::Unknown).await;
        }
    }
}
