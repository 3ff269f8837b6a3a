//! Named memory regions.
//!
//! Each MEMORY row of the configuration becomes one region here: a
//! symbolic name bound at bootstrap to a pool allocation whose access has
//! been narrowed to the declared mask and whose caching attribute has been
//! applied via MemoryControl. Populated once; regions are never removed.

use alloc::string::String;
use alloc::vec::Vec;

use l4_api::{Access, Fpage};

use crate::RegistryError;

/// Declared properties of a named region.
#[derive(Debug, Clone)]
pub struct RegionSpec {
    pub name: String,
    pub size: usize,
    pub access: Access,
    pub cached: bool,
    pub contig: bool,
}

/// A region together with the frame backing it.
#[derive(Debug, Clone)]
pub struct NamedRegion {
    pub spec: RegionSpec,
    pub location: Fpage,
}

pub struct NamedMemRegistry {
    regions: Vec<NamedRegion>,
}

impl NamedMemRegistry {
    pub fn new() -> NamedMemRegistry {
        NamedMemRegistry {
            regions: Vec::new(),
        }
    }

    /// Bind `spec.name` to `location`. Fails if the name is taken.
    pub fn add(&mut self, spec: RegionSpec, location: Fpage) -> Result<(), RegistryError> {
        if self.lookup(&spec.name).is_some() {
            return Err(RegistryError::AlreadyExists);
        }
        debug_assert!(location.size() >= spec.size);
        debug_assert!(location.access() == spec.access);
        self.regions.push(NamedRegion { spec, location });
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&NamedRegion> {
        self.regions.iter().find(|r| r.spec.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedRegion> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl Default for NamedMemRegistry {
    fn default() -> Self {
        Self::new()
    }
}
