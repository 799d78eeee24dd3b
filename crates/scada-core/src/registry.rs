use crate::error::TagError;
use crate::tags::TagDescriptor;
use indexmap::IndexMap;

/// Name → descriptor map. Keeps insertion order for display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagRegistry {
    tags: IndexMap<String, TagDescriptor>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry, rejecting repeated names.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = TagDescriptor>,
    ) -> Result<Self, TagError> {
        let mut registry = Self::new();
        for descriptor in descriptors {
            if registry.tags.contains_key(descriptor.name()) {
                return Err(TagError::DuplicateTag(descriptor.name().to_string()));
            }
            registry.insert_or_replace(descriptor);
        }
        Ok(registry)
    }

    pub fn resolve(&self, name: &str) -> Result<&TagDescriptor, TagError> {
        self.tags
            .get(name)
            .ok_or_else(|| TagError::UnknownTag(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&TagDescriptor> {
        self.tags.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }

    /// Inserts or replaces by name; a replaced tag keeps its display position.
    pub fn insert_or_replace(&mut self, descriptor: TagDescriptor) -> Option<TagDescriptor> {
        self.tags.insert(descriptor.name().to_string(), descriptor)
    }

    pub fn remove(&mut self, name: &str) -> Option<TagDescriptor> {
        self.tags.shift_remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TagDescriptor> {
        self.tags.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tags.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::{RegionKind, ValueKind};

    fn flag(name: &str, byte: u32) -> TagDescriptor {
        TagDescriptor::new(name, RegionKind::Flag, ValueKind::Boolean, byte, Some(0), None).unwrap()
    }

    #[test]
    fn resolve_reports_missing_names() {
        let registry = TagRegistry::from_descriptors([flag("START1", 0)]).unwrap();
        assert!(registry.resolve("START1").is_ok());
        assert_eq!(
            registry.resolve("STOP1"),
            Err(TagError::UnknownTag("STOP1".to_string()))
        );
    }

    #[test]
    fn duplicates_rejected_on_build() {
        let res = TagRegistry::from_descriptors([flag("A", 0), flag("A", 1)]);
        assert_eq!(res, Err(TagError::DuplicateTag("A".to_string())));
    }

    #[test]
    fn replace_keeps_display_order() {
        let mut registry = TagRegistry::from_descriptors([flag("A", 0), flag("B", 1), flag("C", 2)]).unwrap();
        let previous = registry.insert_or_replace(flag("B", 9));
        assert_eq!(previous.map(|t| t.byte_offset()), Some(1));
        assert_eq!(registry.names().collect::<Vec<_>>(), ["A", "B", "C"]);
        assert_eq!(registry.resolve("B").unwrap().byte_offset(), 9);

        registry.remove("A");
        assert_eq!(registry.names().collect::<Vec<_>>(), ["B", "C"]);
        assert_eq!(registry.len(), 2);
    }
}
