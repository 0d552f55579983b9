//! Positional bind parameters for one logical row.

use crate::models::{SqlType, SqlValue};

/// One positional binding: a value plus an optional type hint.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub hint: Option<SqlType>,
    pub value: SqlValue,
}

impl Binding {
    pub fn new(value: impl Into<SqlValue>) -> Self {
        Self {
            hint: None,
            value: value.into(),
        }
    }

    pub fn typed(hint: SqlType, value: impl Into<SqlValue>) -> Self {
        Self {
            hint: Some(hint),
            value: value.into(),
        }
    }
}

/// Ordered bind parameters. Insertion order is bind-position order (1-based).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamBinder {
    bindings: Vec<Binding>,
}

impl ParamBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bindings: Vec::with_capacity(capacity),
        }
    }

    /// Append a value whose SQL type is inferred by the driver.
    pub fn append(&mut self, value: impl Into<SqlValue>) -> &mut Self {
        self.bindings.push(Binding::new(value));
        self
    }

    /// Append a value with an explicit SQL type hint.
    pub fn append_typed(&mut self, hint: SqlType, value: impl Into<SqlValue>) -> &mut Self {
        self.bindings.push(Binding::typed(hint, value));
        self
    }

    /// Append several untyped values in order.
    pub fn extend<I, V>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.bindings.extend(values.into_iter().map(Binding::new));
        self
    }

    pub fn as_slice(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Binding> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl<V: Into<SqlValue>> FromIterator<V> for ParamBinder {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        let mut binder = ParamBinder::new();
        binder.extend(iter);
        binder
    }
}

impl From<Vec<SqlValue>> for ParamBinder {
    fn from(values: Vec<SqlValue>) -> Self {
        values.into_iter().collect()
    }
}

impl<'a> IntoIterator for &'a ParamBinder {
    type Item = &'a Binding;
    type IntoIter = std::slice::Iter<'a, Binding>;

    fn into_iter(self) -> Self::IntoIter {
        self.bindings.iter()
    }
}
