use crate::runner::{ExecutionResult, TIMEOUT_MARKER};
use thiserror::Error;

/// Catch-all category for output that matches no taxonomy entry.
pub const UNCLASSIFIED: &str = "unclassified";

/// Category for samples whose target process could not be run at all.
pub const SPAWN_ERROR: &str = "spawn_error";

/// The reference taxonomy as `(name, pattern)` pairs, highest priority first.
const REFERENCE_CATEGORIES: &[(&str, &str)] = &[
    ("bad_variant_access", "bad_variant_access"),
    ("std::bad_alloc", "std::bad_alloc"),
    ("unknown instruction", "unknown instruction"),
    (
        "warning unused quote expression",
        "warning unused quote expression",
    ),
    (
        "warning statement has no effect",
        "warning statement has no effect",
    ),
    (
        "warning ignoring return value of function",
        "warning ignoring return value of function",
    ),
    ("unbound variable:", "unbound variable:"),
    ("unrecognized macro form", "unrecognized macro form"),
    (
        "can not modify a constant list",
        "can not modify a constant list",
    ),
    ("was of type", "was of type"),
    ("was not provided", "was not provided"),
    ("but it received", "but it received"),
    ("parseerror:", "parseerror:"),
    ("compilationerror", "compilationerror"),
    (TIMEOUT_MARKER, TIMEOUT_MARKER),
    // Padded so that words like "shouldn't be" or "should belong" do not match.
    ("should be", " should be "),
];

/// Problems with a category list that would make classification ambiguous.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TaxonomyError {
    #[error("category {0:?} is declared more than once")]
    DuplicateCategory(String),
    #[error("category name {0:?} is reserved")]
    ReservedName(String),
    #[error("category {0:?} has an empty pattern and would match everything")]
    EmptyPattern(String),
}

/// One named failure category and the text that identifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    name: String,
    pattern: String,
}

impl Category {
    /// The pattern is lowercased so that it can be tested against lowercased output.
    pub fn new(name: impl Into<String>, pattern: impl AsRef<str>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.as_ref().to_lowercase(),
        }
    }

    /// Bucket name reported for matching output.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lowercased text searched for in the output.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// `lowered` must already be lowercase.
    pub fn matches(&self, lowered: &str) -> bool {
        lowered.contains(&self.pattern)
    }
}

/// An ordered list of categories. Earlier entries take priority: output that
/// matches several categories is attributed to the first one only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taxonomy {
    categories: Vec<Category>,
}

impl Taxonomy {
    /// Validates and wraps an ordered category list.
    ///
    /// # Errors
    /// Fails if a name is reserved or repeated, or if a pattern is empty.
    /// `timeout` may be declared; it only sets where the bucket is listed.
    pub fn new(categories: Vec<Category>) -> Result<Self, TaxonomyError> {
        for (i, category) in categories.iter().enumerate() {
            if category.name == UNCLASSIFIED || category.name == SPAWN_ERROR {
                return Err(TaxonomyError::ReservedName(category.name.clone()));
            }
            if category.pattern.is_empty() {
                return Err(TaxonomyError::EmptyPattern(category.name.clone()));
            }
            if categories[..i].iter().any(|c| c.name == category.name) {
                return Err(TaxonomyError::DuplicateCategory(category.name.clone()));
            }
        }
        Ok(Self { categories })
    }

    /// The built-in taxonomy for interpreter crash output.
    pub fn reference() -> Self {
        Self {
            categories: REFERENCE_CATEGORIES
                .iter()
                .map(|(name, pattern)| Category::new(*name, pattern))
                .collect(),
        }
    }

    /// Categories in priority order.
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Returns the name of the first category whose pattern occurs in `text`
    /// (case-insensitively), or [`UNCLASSIFIED`].
    pub fn classify(&self, text: &str) -> &str {
        let lowered = text.to_lowercase();
        self.categories
            .iter()
            .find(|category| category.matches(&lowered))
            .map_or(UNCLASSIFIED, |category| category.name())
    }

    /// Category for a finished run. A run that hit its deadline is always
    /// [`TIMEOUT_MARKER`], whatever the declared categories would say about
    /// the marker text.
    pub fn classify_result<'a>(&'a self, result: &ExecutionResult) -> &'a str {
        if result.timed_out {
            TIMEOUT_MARKER
        } else {
            self.classify(&result.output)
        }
    }

    /// Every bucket name a report over this taxonomy can contain, in summary order.
    ///
    /// Declared categories come first. `timeout` follows them unless it was
    /// declared, then `unclassified` and `spawn_error`.
    pub fn bucket_names(&self) -> impl Iterator<Item = &str> {
        let declares_timeout = self.categories.iter().any(|c| c.name == TIMEOUT_MARKER);
        self.categories
            .iter()
            .map(Category::name)
            .chain((!declares_timeout).then_some(TIMEOUT_MARKER))
            .chain([UNCLASSIFIED, SPAWN_ERROR])
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self::reference()
    }
}
