//! IP allocation request/status and derived views.

use alloc_common::condition::ConditionedStatus;
use alloc_common::{keys, AllocError, AllocResult, Header, IndexRef, Request, Response, StatusCode};
use alloc_types::{IpPrefix, LabelSelector, Labels, Operator, Requirement, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of an allocated prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefixKind {
    /// A subnet with addresses handed out from it.
    Network,
    /// A single address.
    #[serde(alias = "address")]
    Loopback,
    /// A range prefixes are carved out of.
    Pool,
    /// A top-level block owned by the index.
    Aggregate,
}

impl PrefixKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrefixKind::Network => "network",
            PrefixKind::Loopback => "loopback",
            PrefixKind::Pool => "pool",
            PrefixKind::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for PrefixKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrefixKind {
    type Err = AllocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "network" => Ok(PrefixKind::Network),
            "loopback" | "address" => Ok(PrefixKind::Loopback),
            "pool" => Ok(PrefixKind::Pool),
            "aggregate" => Ok(PrefixKind::Aggregate),
            _ => Err(AllocError::invalid_request(format!("unknown prefix kind '{}'", s))),
        }
    }
}

/// Views of a requested prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixInfo(IpPrefix);

impl PrefixInfo {
    pub fn new(prefix: IpPrefix) -> Self {
        Self(prefix)
    }

    /// The prefix exactly as requested.
    pub fn prefix(&self) -> IpPrefix {
        self.0
    }

    /// The masked network.
    pub fn subnet(&self) -> IpPrefix {
        self.0.network()
    }

    /// Host-length prefix of the requested address.
    pub fn address_prefix(&self) -> IpPrefix {
        self.0.address_prefix()
    }

    pub fn is_address_prefix(&self) -> bool {
        self.0.is_address_prefix()
    }
}

impl FromStr for PrefixInfo {
    type Err = AllocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PrefixInfo(s.parse()?))
    }
}

/// Desired state of an IP allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpAllocationSpec {
    pub kind: PrefixKind,
    /// Explicit prefix; absent for dynamic allocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Length of a dynamically allocated network or pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_length: Option<u8>,
    /// Materialize the network prefix itself rather than only its address.
    #[serde(default)]
    pub create_prefix: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
}

impl IpAllocationSpec {
    pub fn new(kind: PrefixKind) -> Self {
        Self {
            kind,
            prefix: None,
            prefix_length: None,
            create_prefix: false,
            selector: None,
            labels: Labels::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_prefix_length(mut self, len: u8) -> Self {
        self.prefix_length = Some(len);
        self
    }

    pub fn with_create_prefix(mut self, create_prefix: bool) -> Self {
        self.create_prefix = create_prefix;
        self
    }

    pub fn with_selector(mut self, selector: LabelSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }
}

/// Observed state of an IP allocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpAllocationStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(flatten)]
    pub conditions: ConditionedStatus,
}

/// An IP allocation as seen by the IPAM backend.
#[derive(Debug, Clone, PartialEq)]
pub struct IpAllocation {
    pub header: Header,
    pub index: IndexRef,
    pub spec: IpAllocationSpec,
    pub status: IpAllocationStatus,
}

impl IpAllocation {
    pub fn new(header: Header, index: IndexRef, spec: IpAllocationSpec) -> Self {
        Self {
            header,
            index,
            spec,
            status: IpAllocationStatus::default(),
        }
    }

    pub fn from_request(req: &Request) -> AllocResult<Self> {
        Ok(Self::new(req.header.clone(), req.index.clone(), req.spec_as()?))
    }

    pub fn to_request(&self) -> AllocResult<Request> {
        Request::new(self.header.clone(), self.index.clone(), &self.spec)
    }

    pub fn to_response(&self, code: StatusCode) -> AllocResult<Response> {
        Ok(Response {
            header: self.header.clone(),
            index: self.index.clone(),
            spec: serde_json::to_value(&self.spec)?,
            status: serde_json::to_value(&self.status)?,
            status_code: code,
        })
    }

    pub fn kind(&self) -> PrefixKind {
        self.spec.kind
    }

    pub fn create_prefix(&self) -> bool {
        self.spec.create_prefix
    }

    /// Only the address of a network is stored, not the network itself.
    pub fn is_network_address(&self) -> bool {
        self.spec.kind == PrefixKind::Network && !self.spec.create_prefix
    }

    /// Parsed explicit prefix, if any.
    pub fn prefix_info(&self) -> AllocResult<Option<PrefixInfo>> {
        self.spec.prefix.as_deref().map(str::parse).transpose()
    }

    /// Labels identifying the allocation, its owner and the index.
    pub fn system_labels(&self) -> Labels {
        let mut labels = self.header.system_labels();
        labels.insert(keys::PREFIX_KIND, self.spec.kind.as_str());
        labels.insert(keys::INDEX, self.index.to_label_value());
        labels
    }

    /// Labels of the route created for this allocation: user labels, then
    /// the selector's match labels, then the system labels. Later sets win.
    pub fn full_labels(&self) -> Labels {
        let mut labels = self.spec.labels.clone();
        if let Some(selector) = &self.spec.selector {
            labels.merge(&selector.match_labels);
        }
        labels.merge(&self.system_labels());
        labels
    }

    /// Selector for every route created by this allocation's resource.
    pub fn owner_selector(&self) -> AllocResult<Selector> {
        let labels = self.header.system_labels();
        let mut selector = Selector::everything();
        for key in [keys::GVK, keys::NSN_NAME, keys::NSN_NAMESPACE] {
            let value = labels.get(key).unwrap_or_default();
            selector = selector.with(Requirement::new(key, Operator::In, [value])?);
        }
        Ok(selector)
    }

    /// Selector for the route this allocation already holds: its owner
    /// identity narrowed by the request's selector. Selector terms on system
    /// keys are dropped since the route carries this allocation's own values.
    pub fn label_selector(&self) -> AllocResult<Selector> {
        let mut selector = self.owner_selector()?;
        if let Some(s) = &self.spec.selector {
            let system = self.system_labels();
            let narrowed = LabelSelector {
                match_labels: s
                    .match_labels
                    .iter()
                    .filter(|(k, _)| !system.contains_key(k))
                    .collect(),
                match_expressions: s
                    .match_expressions
                    .iter()
                    .filter(|e| !system.contains_key(&e.key))
                    .cloned()
                    .collect(),
            };
            selector = selector.merge(narrowed.to_selector()?);
        }
        Ok(selector)
    }

    /// Selector for the parent a dynamic allocation is carved out of.
    pub fn alloc_selector(&self) -> AllocResult<Option<Selector>> {
        Ok(self.spec.selector.as_ref().map(LabelSelector::to_selector).transpose()?)
    }

    /// Selector for the gateway address of the selected network.
    pub fn gateway_selector(&self) -> AllocResult<Selector> {
        let mut match_labels = self
            .spec
            .selector
            .as_ref()
            .map(|s| s.match_labels.clone())
            .unwrap_or_default();
        match_labels.insert(keys::GATEWAY, "true");
        Ok(Selector::from_labels(&match_labels)?)
    }

    /// The prefix reported back once `info` has been applied.
    ///
    /// A network address keeps the requested mask length (`10.0.0.5/24`),
    /// everything else is reported as requested.
    pub fn allocated_prefix(&self, info: &PrefixInfo) -> String {
        info.prefix().to_string()
    }
}

impl fmt::Display for IpAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.header.nsn, self.spec.kind)
    }
}
