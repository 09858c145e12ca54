//! Memento text encoding

use bkl_core::BrooklynObjectType;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{MementoError, MementoResult};
use crate::memento::{AdjunctMemento, AnyMemento, Memento};

/// Converts mementos to and from their persisted JSON form
#[derive(Debug, Clone, Copy)]
pub struct MementoSerializer {
    pretty: bool,
}

impl Default for MementoSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl MementoSerializer {
    /// Serializer writing pretty-printed JSON
    #[must_use]
    pub fn new() -> Self {
        Self { pretty: true }
    }

    /// Write compact JSON instead
    #[inline]
    #[must_use]
    pub fn compact(mut self) -> Self {
        self.pretty = false;
        self
    }

    /// Encode a memento
    ///
    /// # Errors
    /// Returns [`MementoError::Serialization`] if a value cannot be encoded
    pub fn to_string(&self, memento: &AnyMemento) -> MementoResult<String> {
        let kind = memento.object_type();
        match memento {
            AnyMemento::Entity(m) => self.encode(kind, m.id(), m),
            AnyMemento::Location(m) => self.encode(kind, m.id(), m),
            AnyMemento::Adjunct(m) => self.encode(kind, m.id(), m),
            AnyMemento::CatalogItem(m) => self.encode(kind, m.id(), m),
            AnyMemento::ManagedBundle(m) => self.encode(kind, m.id(), m),
        }
    }

    /// Decode a memento persisted under the category of `kind`
    ///
    /// # Errors
    /// Returns [`MementoError::Deserialization`] for malformed text, or
    /// [`MementoError::KindMismatch`] when an adjunct is filed under the
    /// wrong category
    pub fn from_str(&self, kind: BrooklynObjectType, text: &str) -> MementoResult<AnyMemento> {
        Ok(match kind {
            BrooklynObjectType::Entity => AnyMemento::Entity(decode(kind, text)?),
            BrooklynObjectType::Location => AnyMemento::Location(decode(kind, text)?),
            BrooklynObjectType::Policy | BrooklynObjectType::Enricher | BrooklynObjectType::Feed => {
                let memento: AdjunctMemento = decode(kind, text)?;
                let actual = memento.kind.object_type();
                if actual != kind {
                    return Err(MementoError::KindMismatch {
                        id: memento.common.id,
                        expected: kind,
                        actual,
                    });
                }
                AnyMemento::Adjunct(memento)
            }
            BrooklynObjectType::CatalogItem => AnyMemento::CatalogItem(decode(kind, text)?),
            BrooklynObjectType::ManagedBundle => AnyMemento::ManagedBundle(decode(kind, text)?),
        })
    }

    fn encode<T: Serialize>(&self, kind: BrooklynObjectType, id: &str, value: &T) -> MementoResult<String> {
        let encoded = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        encoded.map_err(|e| MementoError::Serialization {
            kind,
            id: id.to_string(),
            message: e.to_string(),
        })
    }
}

fn decode<T: DeserializeOwned>(kind: BrooklynObjectType, text: &str) -> MementoResult<T> {
    serde_json::from_str(text).map_err(|e| MementoError::Deserialization {
        kind,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memento::{EntityMemento, MementoCommon};
    use bkl_config::ConfigValue;
    use bkl_core::AdjunctKind;
    use pretty_assertions::assert_eq;

    fn common(id: &str, type_name: &str) -> MementoCommon {
        MementoCommon {
            id: id.into(),
            type_name: type_name.into(),
            ..MementoCommon::default()
        }
    }

    #[test]
    fn entity_text_round_trips() {
        let mut memento = EntityMemento {
            common: common("e1", "Server"),
            parent: Some("app".into()),
            ..EntityMemento::default()
        };
        memento.config.insert("port".into(), ConfigValue::from(8080));
        let serializer = MementoSerializer::new();
        let text = serializer
            .to_string(&AnyMemento::Entity(memento.clone()))
            .unwrap();
        assert!(text.contains("\"type\": \"Server\""));

        match serializer.from_str(BrooklynObjectType::Entity, &text).unwrap() {
            AnyMemento::Entity(back) => assert_eq!(back, memento),
            other => panic!("unexpected memento {other:?}"),
        }
    }

    #[test]
    fn adjunct_filed_under_wrong_category_is_rejected() {
        let memento = AdjunctMemento {
            common: common("p1", "Restarter"),
            kind: AdjunctKind::Policy,
            entity: None,
            unique_tag: None,
            config: Default::default(),
            flags: Default::default(),
        };
        let serializer = MementoSerializer::new().compact();
        let text = serializer.to_string(&AnyMemento::Adjunct(memento)).unwrap();
        let err = serializer
            .from_str(BrooklynObjectType::Enricher, &text)
            .unwrap_err();
        assert!(matches!(err, MementoError::KindMismatch { .. }));
    }

    #[test]
    fn malformed_text_is_a_deserialization_error() {
        let err = MementoSerializer::new()
            .from_str(BrooklynObjectType::Location, "{not json")
            .unwrap_err();
        assert!(matches!(err, MementoError::Deserialization { .. }));
    }
}
