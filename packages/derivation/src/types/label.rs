//! Labels and extractors - the configured computation rules.

use serde::{Deserialize, Serialize};

use super::{GroupId, LabelId};

/// How a label with two or more extractors combines multi-valued results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CombinationMode {
    /// Index-aligned: results sharing an iteration key form one bundle.
    #[default]
    Zip,
    /// Full Cartesian product across distinct iteration sources.
    NxN,
}

/// How a reducer label treats a multi-valued upstream it does not iterate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ScalarMethod {
    /// Take the first upstream row's value.
    #[default]
    First,
    /// Pass the full ordered list of upstream values to the reducer.
    All,
}

/// The source an extractor draws its value from.
///
/// A closed set: run documents, previously computed labels, and run
/// metadata. Matched exhaustively throughout the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractorSource {
    /// A JSONPath evaluated against the run's data document.
    RawPath { path: String },
    /// A reference to another label's computed output, by name.
    LabelRef {
        /// Name of the upstream label
        label: String,
        /// Explicit binding when several groups define `label`
        source_group: Option<GroupId>,
        /// JSONPath suffix applied to each upstream value
        path: Option<String>,
    },
    /// A JSONPath evaluated against the run's metadata document.
    MetadataPath { path: String },
}

/// One source-binding within a label, producing a named input value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extractor {
    /// Key this extractor's value takes in the combined bundle
    pub name: String,
    pub source: ExtractorSource,
    /// Treat the resolved array as independent iteration branches
    pub foreach: bool,
}

impl Extractor {
    /// Extractor over the run's data document.
    pub fn path(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: ExtractorSource::RawPath { path: path.into() },
            foreach: false,
        }
    }

    /// Extractor over the run's metadata document.
    pub fn metadata(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: ExtractorSource::MetadataPath { path: path.into() },
            foreach: false,
        }
    }

    /// Extractor over another label's computed output.
    pub fn label_ref(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: ExtractorSource::LabelRef {
                label: label.into(),
                source_group: None,
                path: None,
            },
            foreach: false,
        }
    }

    /// Mark this extractor as iterating over its resolved array.
    pub fn foreach(mut self) -> Self {
        self.foreach = true;
        self
    }

    /// Apply a JSONPath suffix to each referenced upstream value.
    ///
    /// Only meaningful for label references; ignored otherwise.
    pub fn with_path(mut self, suffix: impl Into<String>) -> Self {
        if let ExtractorSource::LabelRef { path, .. } = &mut self.source {
            *path = Some(suffix.into());
        }
        self
    }

    /// Bind the label reference to a specific group.
    pub fn from_group(mut self, group: GroupId) -> Self {
        if let ExtractorSource::LabelRef { source_group, .. } = &mut self.source {
            *source_group = Some(group);
        }
        self
    }
}

/// A named computation rule producing derived values from a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub id: LabelId,
    pub name: String,
    /// Group this label belongs to
    pub group_id: GroupId,
    /// Ordered extractors; order matters for fallback chains and NxN
    pub extractors: Vec<Extractor>,
    /// Optional reduction script applied to each combined bundle
    pub reducer: Option<String>,
    /// When set, this label's rows are the base rows of that group
    pub target_group: Option<GroupId>,
    /// Applies when the label has two or more extractors
    pub combination: CombinationMode,
    /// Applies when a referenced upstream is multi-valued and this label
    /// has a reducer but does not iterate
    pub scalar_method: ScalarMethod,
    /// Preferred binding target for this name across groups
    pub canonical: bool,
}

impl Label {
    /// Create a label with a fresh id and no extractors.
    pub fn new(name: impl Into<String>, group_id: GroupId) -> Self {
        Self {
            id: LabelId::new(),
            name: name.into(),
            group_id,
            extractors: Vec::new(),
            reducer: None,
            target_group: None,
            combination: CombinationMode::default(),
            scalar_method: ScalarMethod::default(),
            canonical: false,
        }
    }

    /// Append an extractor.
    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractors.push(extractor);
        self
    }

    /// Set the reducer script.
    pub fn with_reducer(mut self, script: impl Into<String>) -> Self {
        self.reducer = Some(script.into());
        self
    }

    /// Project this label's rows into a target group.
    pub fn with_target_group(mut self, group: GroupId) -> Self {
        self.target_group = Some(group);
        self
    }

    /// Set the multi-extractor combination mode.
    pub fn with_combination(mut self, mode: CombinationMode) -> Self {
        self.combination = mode;
        self
    }

    /// Set the scalar-selection mode.
    pub fn with_scalar_method(mut self, method: ScalarMethod) -> Self {
        self.scalar_method = method;
        self
    }

    /// Mark this label as the canonical source for its name.
    pub fn canonical(mut self) -> Self {
        self.canonical = true;
        self
    }
}
