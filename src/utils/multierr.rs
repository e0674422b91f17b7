use std::error::Error;
use std::fmt;

/// Errors reported by individual workers, tagged with the worker id
#[derive(Debug)]
pub struct MultiError<E> {
    errors: Vec<(usize, E)>,
}

impl<E> Default for MultiError<E> {
    fn default() -> Self {
        Self { errors: Vec::new() }
    }
}

impl<E> MultiError<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, worker: usize, error: E) {
        self.errors.push((worker, error));
    }

    pub fn errors(&self) -> &[(usize, E)] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl<E: fmt::Display> fmt::Display for MultiError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "no worker errors");
        }
        write!(f, "{} worker error(s): ", self.errors.len())?;
        for (i, (worker, error)) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "worker {}: {}", worker, error)?;
        }
        Ok(())
    }
}

impl<E: Error + 'static> Error for MultiError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.errors.first().map(|(_, e)| e as &dyn Error)
    }
}
