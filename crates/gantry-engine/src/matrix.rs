//! Matrix expansion for parallel job instance generation.

use gantry_core::pipeline::MatrixConfig;
use gantry_core::{Error, Result};
use indexmap::IndexMap;
use std::collections::HashMap;

/// One concrete combination of axis values.
///
/// Bindings keep axis declaration order so instance identifiers are
/// deterministic across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatrixCell {
    bindings: Vec<(String, String)>,
}

impl MatrixCell {
    pub fn get(&self, axis: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(k, _)| k == axis)
            .map(|(_, v)| v.as_str())
    }

    pub fn bindings(&self) -> &[(String, String)] {
        &self.bindings
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        self.bindings.iter().cloned().collect()
    }

    fn insert(&mut self, axis: &str, value: String) {
        match self.bindings.iter_mut().find(|(k, _)| k == axis) {
            Some((_, v)) => *v = value,
            None => self.bindings.push((axis.to_string(), value)),
        }
    }
}

/// Expander for matrix configurations.
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand a job's matrix into the ordered set of cells: Cartesian
    /// product in axis declaration order, then `include` overrides,
    /// then `exclude` removals.
    ///
    /// A job without a matrix yields exactly one cell with no axis
    /// bindings.
    pub fn expand(&self, job_name: &str, matrix: Option<&MatrixConfig>) -> Result<Vec<MatrixCell>> {
        let Some(matrix) = matrix else {
            return Ok(vec![MatrixCell::default()]);
        };

        let mut cells = product(&matrix.axes);
        let product_len = cells.len();

        for entry in &matrix.include {
            self.apply_include(job_name, matrix, &mut cells, product_len, entry)?;
        }

        for entry in &matrix.exclude {
            for axis in entry.keys() {
                if !matrix.axes.contains_key(axis) {
                    return Err(Error::UndeclaredAxis {
                        job: job_name.to_string(),
                        axis: axis.clone(),
                    });
                }
            }
            cells.retain(|cell| !matches_entry(cell, entry));
        }

        Ok(cells)
    }

    /// An include entry either narrows the product cells it matches on
    /// declared axes (adding its extra fields), or, matching none,
    /// appends one new fully-specified cell.
    fn apply_include(
        &self,
        job_name: &str,
        matrix: &MatrixConfig,
        cells: &mut Vec<MatrixCell>,
        product_len: usize,
        entry: &IndexMap<String, serde_json::Value>,
    ) -> Result<()> {
        let declared: Vec<(&String, String)> = entry
            .iter()
            .filter(|(k, _)| matrix.axes.contains_key(*k))
            .map(|(k, v)| (k, value_text(v)))
            .collect();
        let extra: Vec<(&String, String)> = entry
            .iter()
            .filter(|(k, _)| !matrix.axes.contains_key(*k))
            .map(|(k, v)| (k, value_text(v)))
            .collect();

        let matched: Vec<usize> = (0..product_len)
            .filter(|&i| {
                declared
                    .iter()
                    .all(|(k, v)| cells[i].get(k) == Some(v.as_str()))
            })
            .collect();

        if !matched.is_empty() {
            for i in matched {
                for (axis, value) in &extra {
                    if let Some(existing) = cells[i].get(axis)
                        && existing != value.as_str()
                    {
                        return Err(Error::ConflictingInclude {
                            job: job_name.to_string(),
                            axis: (*axis).clone(),
                        });
                    }
                    cells[i].insert(axis, value.clone());
                }
            }
            return Ok(());
        }

        // No match: the entry stands alone and must bind every axis.
        for axis in matrix.axes.keys() {
            if !entry.contains_key(axis) {
                return Err(Error::InvalidDefinition {
                    path: format!("jobs.{}.matrix.include", job_name),
                    message: format!(
                        "include entry matches no cell and does not bind axis '{}'",
                        axis
                    ),
                });
            }
        }

        let mut cell = MatrixCell::default();
        // Declared axes first, in declaration order, then extras.
        for axis in matrix.axes.keys() {
            cell.insert(axis, value_text(&entry[axis]));
        }
        for (axis, value) in extra {
            cell.insert(axis, value);
        }
        if !cells.contains(&cell) {
            cells.push(cell);
        }
        Ok(())
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}

fn product(axes: &IndexMap<String, Vec<serde_json::Value>>) -> Vec<MatrixCell> {
    let mut cells = vec![MatrixCell::default()];

    for (axis, values) in axes {
        let mut next = Vec::with_capacity(cells.len() * values.len());
        for cell in &cells {
            for value in values {
                let mut combo = cell.clone();
                combo.insert(axis, value_text(value));
                next.push(combo);
            }
        }
        cells = next;
    }

    cells
}

fn matches_entry(cell: &MatrixCell, entry: &IndexMap<String, serde_json::Value>) -> bool {
    entry
        .iter()
        .all(|(k, v)| cell.get(k) == Some(value_text(v).as_str()))
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::pipeline::PipelineDefinition;
    use pretty_assertions::assert_eq;

    fn matrix_from_yaml(yaml: &str) -> MatrixConfig {
        let doc = format!(
            "name: t\njobs:\n  job:\n    steps:\n      - name: s\n        run: 'true'\n{}",
            yaml
        );
        let def = PipelineDefinition::from_yaml(&doc).unwrap();
        def.jobs["job"].matrix.clone().unwrap()
    }

    fn job_matrix(yaml: &str) -> Option<MatrixConfig> {
        Some(matrix_from_yaml(yaml))
    }

    fn names(cells: &[MatrixCell]) -> Vec<String> {
        cells
            .iter()
            .map(|c| {
                c.bindings()
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect()
    }

    #[test]
    fn test_cartesian_product_size_and_order() {
        let matrix = job_matrix(
            "    matrix:\n      axes:\n        os: [linux, macos]\n        arch: [x86_64, aarch64]\n",
        );
        let cells = MatrixExpander::new().expand("build", matrix.as_ref()).unwrap();

        assert_eq!(cells.len(), 4);
        assert_eq!(
            names(&cells),
            vec![
                "os=linux,arch=x86_64",
                "os=linux,arch=aarch64",
                "os=macos,arch=x86_64",
                "os=macos,arch=aarch64",
            ]
        );
    }

    #[test]
    fn test_expansion_is_deterministic() {
        let matrix = job_matrix(
            "    matrix:\n      axes:\n        os: [linux, macos, windows]\n        profile: [debug, release]\n",
        );
        let expander = MatrixExpander::new();
        let a = expander.expand("test", matrix.as_ref()).unwrap();
        let b = expander.expand("test", matrix.as_ref()).unwrap();
        assert_eq!(names(&a), names(&b));
    }

    #[test]
    fn test_no_matrix_yields_single_bare_cell() {
        let cells = MatrixExpander::new().expand("check", None).unwrap();
        assert_eq!(cells.len(), 1);
        assert!(cells[0].is_empty());
    }

    #[test]
    fn test_exclude_removes_matching_cells() {
        let matrix = job_matrix(
            "    matrix:\n      axes:\n        os: [linux, macos]\n        arch: [x86_64, aarch64]\n      exclude:\n        - os: macos\n          arch: x86_64\n",
        );
        let cells = MatrixExpander::new().expand("build", matrix.as_ref()).unwrap();
        assert_eq!(cells.len(), 3);
        assert!(!names(&cells).contains(&"os=macos,arch=x86_64".to_string()));
    }

    #[test]
    fn test_include_narrows_matched_cells() {
        let matrix = job_matrix(
            "    matrix:\n      axes:\n        os: [linux, macos]\n      include:\n        - os: linux\n          container: debian\n",
        );
        let cells = MatrixExpander::new().expand("build", matrix.as_ref()).unwrap();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].get("container"), Some("debian"));
        assert_eq!(cells[1].get("container"), None);
    }

    #[test]
    fn test_include_appends_fully_specified_cell() {
        let matrix = job_matrix(
            "    matrix:\n      axes:\n        os: [linux, macos]\n      include:\n        - os: freebsd\n",
        );
        let cells = MatrixExpander::new().expand("build", matrix.as_ref()).unwrap();
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[2].get("os"), Some("freebsd"));
    }

    #[test]
    fn test_include_missing_axis_is_config_error() {
        let matrix = job_matrix(
            "    matrix:\n      axes:\n        os: [linux]\n        arch: [x86_64]\n      include:\n        - os: freebsd\n",
        );
        let err = MatrixExpander::new()
            .expand("build", matrix.as_ref())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDefinition { .. }));
        assert_eq!(err.kind(), gantry_core::ErrorKind::Config);
    }

    #[test]
    fn test_conflicting_includes_are_rejected() {
        let matrix = job_matrix(
            "    matrix:\n      axes:\n        os: [linux]\n      include:\n        - os: linux\n          container: debian\n        - os: linux\n          container: alpine\n",
        );
        let err = MatrixExpander::new()
            .expand("build", matrix.as_ref())
            .unwrap_err();
        assert!(matches!(err, Error::ConflictingInclude { .. }));
    }

    #[test]
    fn test_exclude_undeclared_axis_is_config_error() {
        let matrix = job_matrix(
            "    matrix:\n      axes:\n        os: [linux]\n      exclude:\n        - arch: x86_64\n",
        );
        let err = MatrixExpander::new()
            .expand("build", matrix.as_ref())
            .unwrap_err();
        assert!(matches!(err, Error::UndeclaredAxis { .. }));
    }

    #[test]
    fn test_numeric_axis_values_are_stringified() {
        let matrix = job_matrix("    matrix:\n      axes:\n        version: [18, 20]\n");
        let cells = MatrixExpander::new().expand("test", matrix.as_ref()).unwrap();
        assert_eq!(cells[0].get("version"), Some("18"));
    }
}
