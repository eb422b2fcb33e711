//! Reference resolution shared by the ranking and full-graph passes.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::parser::{Definition, Reference};

/// Definitions grouped by name.
///
/// Candidates for each name are kept in `(rel_path, start_line)` order, which
/// is also the tie-break order when several candidates score equally.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use atlas_core::LineSpan;
/// use atlas_repomap::parser::{Definition, Reference};
/// use atlas_repomap::resolve::DefinitionIndex;
///
/// let def = |path: &str| Definition {
///     rel_path: PathBuf::from(path),
///     abs_path: PathBuf::from("/repo").join(path),
///     name: "parse".into(),
///     tag_type: "function".into(),
///     span: LineSpan::new(0, 0),
///     byte_range: 4..9,
///     scope: vec![],
/// };
/// let index = DefinitionIndex::new(vec![def("util/parse.py"), def("api/parse.py")]);
///
/// let reference = Reference {
///     rel_path: PathBuf::from("api/handler.py"),
///     abs_path: PathBuf::from("/repo/api/handler.py"),
///     name: "parse".into(),
///     tag_type: "call".into(),
///     span: Some(LineSpan::new(3, 3)),
///     scope: vec![],
/// };
/// let winner = index.resolve(&reference, None).unwrap();
/// assert_eq!(index.get(winner).rel_path, PathBuf::from("api/parse.py"));
/// ```
#[derive(Debug, Default)]
pub struct DefinitionIndex {
    defs: Vec<Definition>,
    by_name: HashMap<String, Vec<usize>>,
}

impl DefinitionIndex {
    /// Index `defs`. Positions in the input are the ids returned by
    /// [`resolve`](Self::resolve).
    pub fn new(defs: Vec<Definition>) -> Self {
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, def) in defs.iter().enumerate() {
            by_name.entry(def.name.clone()).or_default().push(i);
        }
        for candidates in by_name.values_mut() {
            candidates.sort_by(|&a, &b| {
                let (da, db) = (&defs[a], &defs[b]);
                (&da.rel_path, da.span.start, a).cmp(&(&db.rel_path, db.span.start, b))
            });
        }
        Self { defs, by_name }
    }

    /// Definition at `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not produced by this index.
    pub fn get(&self, id: usize) -> &Definition {
        &self.defs[id]
    }

    /// All indexed definitions, in input order.
    pub fn definitions(&self) -> &[Definition] {
        &self.defs
    }

    /// Ids of every definition named `name`, in tie-break order.
    pub fn candidates(&self, name: &str) -> &[usize] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether any definition is named `name`.
    pub fn is_defined(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Distinct files that define `name`.
    pub fn definers(&self, name: &str) -> BTreeSet<&Path> {
        self.candidates(name)
            .iter()
            .map(|&id| self.defs[id].rel_path.as_path())
            .collect()
    }

    /// Pick the most plausible definition for `reference`.
    ///
    /// A single candidate always wins. With several, `own` (the definition
    /// that encloses the reference) is never picked and the rest are scored
    /// by [`match_score`]. Ties go to the first candidate in
    /// `(rel_path, start_line)` order; a best score of zero resolves to
    /// nothing.
    pub fn resolve(&self, reference: &Reference, own: Option<usize>) -> Option<usize> {
        let candidates = self.candidates(&reference.name);
        match candidates {
            [] => None,
            [only] => Some(*only),
            _ => {
                let mut best: Option<(usize, u32)> = None;
                for &id in candidates {
                    if Some(id) == own {
                        continue;
                    }
                    let score = match_score(reference, &self.defs[id]);
                    if score > best.map_or(0, |(_, s)| s) {
                        best = Some((id, score));
                    }
                }
                best.map(|(id, _)| id)
            }
        }
    }
}

/// Plausibility of `def` as the target of `reference`.
///
/// +2 when both live in the same file, otherwise +1 when they share a
/// directory; +1 more when both sit inside a class of the same name.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use atlas_core::LineSpan;
/// use atlas_repomap::parser::{Definition, Reference};
/// use atlas_repomap::resolve::match_score;
///
/// let def = Definition {
///     rel_path: PathBuf::from("a/x.py"),
///     abs_path: PathBuf::from("/r/a/x.py"),
///     name: "run".into(),
///     tag_type: "method".into(),
///     span: LineSpan::new(2, 2),
///     byte_range: 0..3,
///     scope: vec!["Job".into()],
/// };
/// let reference = Reference {
///     rel_path: PathBuf::from("a/x.py"),
///     abs_path: PathBuf::from("/r/a/x.py"),
///     name: "run".into(),
///     tag_type: "call".into(),
///     span: Some(LineSpan::new(9, 9)),
///     scope: vec!["Job".into()],
/// };
/// assert_eq!(match_score(&reference, &def), 3);
/// ```
pub fn match_score(reference: &Reference, def: &Definition) -> u32 {
    let mut score = 0;
    if reference.rel_path == def.rel_path {
        score += 2;
    } else if reference.rel_path.parent() == def.rel_path.parent() {
        score += 1;
    }
    if let (Some(ref_class), Some(def_class)) = (reference.enclosing_class(), def.enclosing_class())
    {
        if ref_class == def_class {
            score += 1;
        }
    }
    score
}
