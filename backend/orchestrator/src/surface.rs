use std::collections::HashSet;
use std::sync::RwLock;

use canopy_core::HostSurface;

/// Host surface without a DOM: a fixed set of container selectors.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    containers: RwLock<HashSet<String>>,
}

impl HeadlessSurface {
    pub fn new<I, S>(containers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            containers: RwLock::new(containers.into_iter().map(Into::into).collect()),
        }
    }

    pub fn add_container(&self, selector: impl Into<String>) {
        self.containers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(selector.into());
    }

    pub fn remove_container(&self, selector: &str) -> bool {
        self.containers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(selector)
    }
}

impl HostSurface for HeadlessSurface {
    fn has_container(&self, selector: &str) -> bool {
        self.containers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(selector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_containers_can_come_and_go() {
        let surface = HeadlessSurface::new(["#main"]);
        assert!(surface.has_container("#main"));
        assert!(!surface.has_container("#side"));

        surface.add_container("#side");
        assert!(surface.has_container("#side"));
        assert!(surface.remove_container("#main"));
        assert!(!surface.has_container("#main"));
    }
}
