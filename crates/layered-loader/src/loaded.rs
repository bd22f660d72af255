/// The outcome of asking a layer for a key.
///
/// `Negative` is a legitimate, cacheable answer: somebody authoritatively knows the value does
/// not exist. `Absent` only means that nobody asked so far knows anything about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loaded<T> {
    Absent,
    Negative,
    Present(T),
}

impl<T> Default for Loaded<T> {
    fn default() -> Self {
        Self::Absent
    }
}

impl<T> Loaded<T> {
    /// Turns a stored value into a resolved one. `None` is a negative entry.
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(value) => Self::Present(value),
            None => Self::Negative,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn is_resolved(&self) -> bool {
        !self.is_absent()
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Present(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Present(value) => Some(value),
            _ => None,
        }
    }

    /// The value as it would be written into a cache layer.
    ///
    /// The outer `None` means there is nothing to write.
    pub fn into_option(self) -> Option<Option<T>> {
        match self {
            Self::Absent => None,
            Self::Negative => Some(None),
            Self::Present(value) => Some(Some(value)),
        }
    }

    pub fn as_ref(&self) -> Loaded<&T> {
        match self {
            Self::Absent => Loaded::Absent,
            Self::Negative => Loaded::Negative,
            Self::Present(value) => Loaded::Present(value),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Loaded<U> {
        match self {
            Self::Absent => Loaded::Absent,
            Self::Negative => Loaded::Negative,
            Self::Present(value) => Loaded::Present(f(value)),
        }
    }
}

impl<T> From<Option<T>> for Loaded<T> {
    fn from(value: Option<T>) -> Self {
        Self::from_option(value)
    }
}
