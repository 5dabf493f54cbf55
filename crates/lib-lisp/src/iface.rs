use std::{collections::HashMap, net::IpAddr};

use crate::types::Address;

/// Operational state reported by the platform for one interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfaceStatus {
    Up,
    Down,
}

/// What the platform collaborator tells the core when an interface
/// changes: a new address, a new status, or both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfaceEvent {
    pub iface: String,
    pub addr: Option<IpAddr>,
    pub status: IfaceStatus,
}

/// One local locator riding on an interface: which mapping it belongs to
/// and the RLOC address it currently has. Pure back-reference; the
/// mapping owns the locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfaceBinding {
    pub eid: Address,
    pub rloc: Address,
}

/// Interface name → the local locators that follow it. Consulted on
/// every interface event to find the mappings to re-advertise.
#[derive(Debug, Default)]
pub struct IfaceLocators {
    bindings: HashMap<String, Vec<IfaceBinding>>,
}

impl IfaceLocators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, iface: &str, eid: Address, rloc: Address) {
        let list = self.bindings.entry(iface.to_string()).or_default();
        let binding = IfaceBinding { eid, rloc };
        if !list.contains(&binding) {
            list.push(binding);
        }
    }

    pub fn bindings(&self, iface: &str) -> &[IfaceBinding] {
        self.bindings.get(iface).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn bindings_mut(&mut self, iface: &str) -> Option<&mut Vec<IfaceBinding>> {
        self.bindings.get_mut(iface)
    }

    pub fn ifaces(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }
}
