//! Model registry.
//!
//! Relationships name their target type; the registry resolves every target
//! and join strategy once, after all models are declared, so models may
//! reference each other in any order (including cycles).

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use super::{Cardinality, Model, Relationship};
use crate::db::ColumnRef;
use crate::{Result, TesseraError};

/// How a relationship's target rows are linked to parent rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Link {
    /// Foreign key on the parent's base table referencing the target key.
    Owner { foreign_key: ColumnRef },
    /// Foreign key on the target's base table referencing the parent key.
    Child { foreign_key: ColumnRef },
    /// Association table holding both parent and target keys.
    Association { parent: ColumnRef, target: ColumnRef },
}

/// Read-only collection of models keyed by type name.
#[derive(Debug, Default)]
pub struct Registry {
    models: IndexMap<String, Arc<Model>>,
    links: HashMap<(String, String), Link>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder { models: Vec::new() }
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<Model>> {
        self.models.get(type_name)
    }

    /// Looks up a model that must exist.
    pub fn model(&self, type_name: &str) -> Result<&Arc<Model>> {
        self.get(type_name).ok_or_else(|| {
            TesseraError::configuration(format!("Unknown resource type '{}'", type_name))
        })
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<Model>> {
        self.models.values()
    }

    /// Resolved link of a relationship declared on `type_name`.
    pub fn link(&self, type_name: &str, relationship: &str) -> Result<&Link> {
        self.links
            .get(&(type_name.to_string(), relationship.to_string()))
            .ok_or_else(|| {
                TesseraError::configuration(format!(
                    "Unknown relationship '{}' on type '{}'",
                    relationship, type_name
                ))
            })
    }
}

pub struct RegistryBuilder {
    models: Vec<Model>,
}

impl RegistryBuilder {
    pub fn model(mut self, model: Model) -> Self {
        self.models.push(model);
        self
    }

    /// Validates type names and resolves every relationship.
    pub fn build(self) -> Result<Registry> {
        let mut models = IndexMap::with_capacity(self.models.len());
        for model in self.models {
            let type_name = model.type_name().to_string();
            if models.insert(type_name.clone(), Arc::new(model)).is_some() {
                return Err(TesseraError::configuration(format!(
                    "Duplicate resource type '{}'",
                    type_name
                )));
            }
        }

        let mut links = HashMap::new();
        for parent in models.values() {
            for rel in parent.relationships() {
                let target = models.get(&rel.target).ok_or_else(|| {
                    TesseraError::configuration(format!(
                        "Relationship '{}' of '{}' targets unknown type '{}'",
                        rel.name,
                        parent.type_name(),
                        rel.target
                    ))
                })?;
                let link = resolve_link(parent, rel, target)?;
                debug!(
                    model = parent.type_name(),
                    relationship = %rel.name,
                    link = ?link,
                    "Resolved relationship"
                );
                links.insert((parent.type_name().to_string(), rel.name.clone()), link);
            }
        }

        Ok(Registry { models, links })
    }
}

/// Whether `fk` is declared as referencing the primary key of `model`.
fn references(fk: &ColumnRef, model: &Model) -> bool {
    fk.table().foreign_keys().iter().any(|key| {
        key.column == fk.column()
            && key.ref_table == model.base().name()
            && key.ref_column == model.pk().column()
    })
}

fn resolve_link(parent: &Model, rel: &Relationship, target: &Model) -> Result<Link> {
    let fk = &rel.foreign_key;
    let fk_table = fk.table().name();
    let misdeclared = |reason: &str| {
        TesseraError::configuration(format!(
            "Relationship '{}' of '{}': {}",
            rel.name,
            parent.type_name(),
            reason
        ))
    };

    match rel.cardinality {
        Cardinality::ManyToOne | Cardinality::OneToOne
            if fk_table == parent.base().name() && references(fk, target) =>
        {
            Ok(Link::Owner {
                foreign_key: fk.clone(),
            })
        }
        Cardinality::OneToMany | Cardinality::OneToOne
            if fk_table == target.base().name() && references(fk, parent) =>
        {
            Ok(Link::Child {
                foreign_key: fk.clone(),
            })
        }
        Cardinality::ManyToMany => {
            if !references(fk, parent) {
                return Err(misdeclared(
                    "association column does not reference the parent primary key",
                ));
            }
            let mut candidates = fk.table().foreign_keys().iter().filter(|key| {
                key.column != fk.column()
                    && key.ref_table == target.base().name()
                    && key.ref_column == target.pk().column()
            });
            let target_key = match (candidates.next(), candidates.next()) {
                (Some(key), None) => key,
                (None, _) => {
                    return Err(misdeclared(
                        "association table has no foreign key to the target",
                    ))
                }
                (Some(_), Some(_)) => {
                    return Err(misdeclared(
                        "association table has several foreign keys to the target",
                    ))
                }
            };
            Ok(Link::Association {
                parent: fk.clone(),
                target: fk.table().col(&target_key.column)?,
            })
        }
        _ => Err(misdeclared(&format!(
            "foreign key {} does not link '{}' and '{}' as {:?}",
            fk.to_sql(),
            parent.base().name(),
            target.base().name(),
            rel.cardinality
        ))),
    }
}
