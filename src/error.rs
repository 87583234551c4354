//! Error aggregation.
//!
//! Fan-out delivery and subsystem shutdown never stop at the first failure.
//! Every error is kept in an [`ErrorAggregate`], which is "no error" when
//! empty and joins associatively with the empty aggregate as identity.

use std::fmt;

/// Boxed error used at task and binary boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An order-preserving collection of zero or more errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorAggregate<E> {
    errors: Vec<E>,
}

impl<E> ErrorAggregate<E> {
    /// Create an empty aggregate.
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Append a single error.
    pub fn push(&mut self, error: E) {
        self.errors.push(error);
    }

    /// Record the error side of a result, if any.
    pub fn record<T>(&mut self, result: Result<T, E>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.errors.push(error);
                None
            }
        }
    }

    /// Join two aggregates, keeping `self`'s errors first.
    pub fn join(mut self, other: Self) -> Self {
        self.errors.extend(other.errors);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.errors.iter()
    }

    pub fn into_vec(self) -> Vec<E> {
        self.errors
    }

    /// `Ok(())` when empty, otherwise the aggregate itself.
    pub fn into_result(self) -> Result<(), Self> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl<E> Default for ErrorAggregate<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> From<E> for ErrorAggregate<E> {
    fn from(error: E) -> Self {
        Self { errors: vec![error] }
    }
}

impl<E> FromIterator<E> for ErrorAggregate<E> {
    fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

impl<E> Extend<E> for ErrorAggregate<E> {
    fn extend<I: IntoIterator<Item = E>>(&mut self, iter: I) {
        self.errors.extend(iter);
    }
}

impl<E> IntoIterator for ErrorAggregate<E> {
    type Item = E;
    type IntoIter = std::vec::IntoIter<E>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl<'a, E> IntoIterator for &'a ErrorAggregate<E> {
    type Item = &'a E;
    type IntoIter = std::slice::Iter<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}

impl<E: fmt::Display> fmt::Display for ErrorAggregate<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "no errors");
        }
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl<E> std::error::Error for ErrorAggregate<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}
