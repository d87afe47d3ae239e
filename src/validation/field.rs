//! Field-scoped validation errors.

use std::{fmt, ops::Deref};

/// A path to a field inside an object, rendered as `spec.tags[latest].from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    rendered: String,
}

impl Path {
    pub fn new(root: &str) -> Self {
        Self {
            rendered: root.to_owned(),
        }
    }

    pub fn child(&self, name: &str) -> Self {
        Self {
            rendered: format!("{}.{}", self.rendered, name),
        }
    }

    pub fn key(&self, key: &str) -> Self {
        Self {
            rendered: format!("{}[{}]", self.rendered, key),
        }
    }

    pub fn index(&self, index: usize) -> Self {
        Self {
            rendered: format!("{}[{}]", self.rendered, index),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

/// The kind of problem a [`FieldError`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// A required field was empty.
    Required,
    /// The value is malformed.
    Invalid,
    /// The value refers to something that does not exist.
    NotFound,
    /// The caller is not allowed to set this value.
    Forbidden,
    /// The value collides with another one.
    Duplicate,
}

/// A single validation failure attached to a field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub error_type: ErrorType,
    pub field: String,
    pub bad_value: String,
    pub detail: String,
}

impl FieldError {
    pub fn required(path: &Path, detail: impl Into<String>) -> Self {
        Self::new(ErrorType::Required, path, String::new(), detail)
    }

    pub fn invalid(path: &Path, value: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(ErrorType::Invalid, path, value, detail)
    }

    pub fn not_found(path: &Path, value: impl Into<String>) -> Self {
        Self::new(ErrorType::NotFound, path, value, String::new())
    }

    pub fn forbidden(path: &Path, detail: impl Into<String>) -> Self {
        Self::new(ErrorType::Forbidden, path, String::new(), detail)
    }

    pub fn duplicate(path: &Path, value: impl Into<String>) -> Self {
        Self::new(ErrorType::Duplicate, path, value, String::new())
    }

    fn new(
        error_type: ErrorType,
        path: &Path,
        bad_value: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            error_type,
            field: path.to_string(),
            bad_value: bad_value.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.error_type {
            ErrorType::Required => write!(f, "{}: Required value", self.field)?,
            ErrorType::Invalid => write!(f, "{}: Invalid value: {:?}", self.field, self.bad_value)?,
            ErrorType::NotFound => write!(f, "{}: Not found: {:?}", self.field, self.bad_value)?,
            ErrorType::Forbidden => write!(f, "{}: Forbidden", self.field)?,
            ErrorType::Duplicate => {
                write!(f, "{}: Duplicate value: {:?}", self.field, self.bad_value)?
            }
        }
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

/// An accumulated set of [`FieldError`]s.
///
/// Validation collects every problem it finds instead of stopping at the first one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorList(Vec<FieldError>);

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: FieldError) {
        self.0.push(err);
    }

    pub fn into_vec(self) -> Vec<FieldError> {
        self.0
    }

    /// Returns whether any error was recorded against `field`.
    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|err| err.field == field)
    }
}

impl Deref for ErrorList {
    type Target = [FieldError];

    fn deref(&self) -> &[FieldError] {
        &self.0
    }
}

impl Extend<FieldError> for ErrorList {
    fn extend<T: IntoIterator<Item = FieldError>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl FromIterator<FieldError> for ErrorList {
    fn from_iter<T: IntoIterator<Item = FieldError>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ErrorList {
    type Item = FieldError;
    type IntoIter = std::vec::IntoIter<FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ErrorList {
    type Item = &'a FieldError;
    type IntoIter = std::slice::Iter<'a, FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<FieldError> for ErrorList {
    fn from(err: FieldError) -> Self {
        Self(vec![err])
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => Ok(()),
            [only] => write!(f, "{only}"),
            many => {
                let rendered: Vec<String> = many.iter().map(|err| err.to_string()).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}
