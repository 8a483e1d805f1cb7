//! Field registry for a settings type.

use crate::error::{Result, SettingsError};
use crate::field::Field;
use std::collections::HashMap;
use std::sync::Arc;

/// Ordered registry of the fields a settings type declares.
///
/// Registering a name twice replaces the earlier declaration in place, which is
/// how a child schema overrides an inherited field.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<Arc<Field>>,
    index: HashMap<String, usize>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a field declaration.
    pub fn field(mut self, field: Field) -> Self {
        self.insert(field);
        self
    }

    /// Add (or replace) a field declaration in place.
    pub fn insert(&mut self, field: Field) {
        let name = field.name().to_string();
        match self.index.get(&name) {
            Some(&i) => self.fields[i] = Arc::new(field),
            None => {
                self.index.insert(name, self.fields.len());
                self.fields.push(Arc::new(field));
            }
        }
    }

    /// Layer `child` over this schema: inherited fields keep their position,
    /// overridden ones take the child's declaration.
    pub fn extend(mut self, child: Schema) -> Self {
        for field in child.fields {
            let field = Arc::unwrap_or_clone(field);
            self.insert(field);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.index.get(name).map(|&i| self.fields[i].as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Every declared field, in declaration order. Each call re-scans.
    pub fn properties(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().map(|f| f.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Declaration checks for every field, plus derived-field references.
    pub fn validate(&self) -> Result<()> {
        for field in self.properties() {
            field.validate_declaration()?;
            if let Some(composition) = field.composition() {
                for referenced in composition.referenced() {
                    if !self.contains(referenced) {
                        return Err(SettingsError::configuration(format!(
                            "Derived property {} references undeclared property {}",
                            field.name(),
                            referenced
                        ))
                        .with_field(field.name()));
                    }
                }
                self.check_cycle(field.name(), &mut Vec::new())?;
            }
        }
        Ok(())
    }

    /// Reject derived fields that (transitively) reference themselves.
    fn check_cycle<'a>(&'a self, name: &'a str, path: &mut Vec<&'a str>) -> Result<()> {
        if path.contains(&name) {
            return Err(SettingsError::configuration(format!(
                "Derived property {} references itself through {}",
                name,
                path.join(" -> ")
            ))
            .with_field(name));
        }
        let Some(composition) = self.get(name).and_then(Field::composition) else {
            return Ok(());
        };
        path.push(name);
        for referenced in composition.referenced() {
            self.check_cycle(referenced, path)?;
        }
        path.pop();
        Ok(())
    }
}
